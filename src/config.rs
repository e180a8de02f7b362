//! Typed configuration snapshot, extracted once at boot from the process
//! environment.

use serde::Deserialize;
use std::time::Duration;

fn default_max_retry_time_ms() -> u64 {
    60_000
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_stream_timeout_ms() -> u64 {
    30_000
}
fn default_max_retry_count() -> u32 {
    3
}
fn default_enable_retry() -> bool {
    false
}
fn default_max_provider_errors() -> u32 {
    5
}
fn default_provider_error_window_ms() -> u64 {
    60_000
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_empty() -> String {
    String::new()
}

/// Immutable configuration, read once at process start.
///
/// Comma-separated list fields (`first_provider_models`,
/// `whitelisted_models`) are kept as raw strings and split on demand via
/// [`Config::moderation_models`] / [`Config::whitelisted_models`] -- Figment's
/// `Env` provider has no built-in CSV-to-`Vec` coercion, and a hand-rolled
/// deserializer would be one more thing to get wrong for no benefit.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub auth_key: String,

    pub first_provider_url: String,
    pub first_provider_key: String,
    #[serde(default = "default_empty")]
    pub first_provider_models: String,

    pub second_provider_url: String,
    pub second_provider_key: String,

    #[serde(default = "default_max_retry_time_ms")]
    pub max_retry_time: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay: u64,
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout: u64,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default = "default_enable_retry")]
    pub enable_retry: bool,

    pub chat_rpm: u32,
    pub images_rpm: u32,
    pub audio_rpm: u32,
    pub models_rpm: u32,
    pub global_ip_rpm: u32,

    #[serde(default = "default_max_provider_errors")]
    pub max_provider_errors: u32,
    #[serde(default = "default_provider_error_window_ms")]
    pub provider_error_window: u64,

    #[serde(default = "default_empty")]
    pub whitelisted_models: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Parses the comma-separated moderation model list, dropping blanks.
    pub fn moderation_models(&self) -> Vec<String> {
        split_csv(&self.first_provider_models)
    }

    /// Parses the comma-separated whitelist of model-name glob patterns.
    pub fn whitelisted_model_patterns(&self) -> Vec<String> {
        split_csv(&self.whitelisted_models)
    }

    pub fn max_retry_time(&self) -> Duration {
        Duration::from_millis(self.max_retry_time)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout)
    }

    pub fn provider_error_window(&self) -> Duration {
        Duration::from_millis(self.provider_error_window)
    }

    /// Per-attempt timeout for moderation and unary primary calls.
    pub fn attempt_timeout(&self) -> Duration {
        self.max_retry_time() / 2
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
