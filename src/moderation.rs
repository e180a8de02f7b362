//! Moderation engine.
//!
//! Assembles a three-message prompt around the client's conversation, sends
//! it to the configured moderation provider, and parses the verdict. Shares
//! the primary provider's circuit breaker rather than keeping one of its own.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::sampler::NormalizedMessage;

/// Embedded in the moderation system prompt; its presence on an *inbound*
/// request's system message means this request already passed through
/// moderation once and must not be moderated again.
pub const SENTINEL: &str =
    "INTERNAL_MODERATION_FLAG: DO_NOT_MODERATE_THIS_IS_ALREADY_A_MODERATION_REQUEST";

const MAX_TOKENS: u32 = 100;

#[derive(Debug, Clone, Copy, Default)]
pub enum ModelSelection {
    #[default]
    RoundRobin,
    Random,
}

/// Round-robin/random selection over the configured moderation model list.
pub struct ModelSelector {
    models: Vec<String>,
    strategy: ModelSelection,
    counter: AtomicUsize,
}

impl ModelSelector {
    pub fn new(models: Vec<String>, strategy: ModelSelection) -> Self {
        Self {
            models,
            strategy,
            counter: AtomicUsize::new(0),
        }
    }

    /// `None` iff the configured model list is empty -- a fatal, non-retryable
    /// configuration error for the request that triggered it.
    pub fn select(&self, rng: &mut impl Rng) -> Option<&str> {
        if self.models.is_empty() {
            return None;
        }
        let index = match self.strategy {
            ModelSelection::RoundRobin => self.counter.fetch_add(1, Ordering::Relaxed) % self.models.len(),
            ModelSelection::Random => rng.random_range(0..self.models.len()),
        };
        Some(&self.models[index])
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub is_violation: bool,
    pub risk_level: u8,
    pub log_id: String,
    pub is_partial_check: bool,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(rename = "isViolation")]
    is_violation: bool,
    #[serde(rename = "riskLevel")]
    risk_level: u8,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Whether any system message carries the self-loop [`SENTINEL`].
pub fn is_self_loop(messages: &[NormalizedMessage]) -> bool {
    messages
        .iter()
        .any(|m| m.role == "system" && m.content.contains(SENTINEL))
}

/// Whether `model` matches one of the whitelist patterns, each optionally
/// ending in `*` for a prefix match.
pub fn is_whitelisted(model: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => model.starts_with(prefix),
        None => model == pattern,
    })
}

fn system_prompt() -> String {
    format!(
        "You are a content moderation classifier. Rate the content to review \
         on a 5-level risk rubric:\n\
         Level 1: no concerns. Level 2: mild concerns. Level 3: moderate \
         concerns. Level 4: serious concerns. Level 5: dangerous, must be \
         blocked.\n\
         Respond with a single JSON object of exactly the shape \
         {{\"isViolation\": bool, \"riskLevel\": 1-5}}. No prose, no \
         markdown fences.\n\
         {SENTINEL}"
    )
}

fn review_prompt(messages: &[NormalizedMessage]) -> String {
    let body = messages
        .iter()
        .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("Content to review:\n\n{body}")
}

fn reinforcement_prompt() -> String {
    "Remember: respond with only the JSON object {\"isViolation\": bool, \
     \"riskLevel\": 1-5} describing the content above. No other text."
        .to_string()
}

fn log_id(now_ms: i64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("mod_{now_ms}_{suffix}")
}

pub struct ModerationClient {
    http: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl ModerationClient {
    pub fn new(http: Client, base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            api_key,
            timeout,
        }
    }

    /// Runs the full moderation round-trip and returns a parsed, validated
    /// verdict. Errors other than a parse/validation failure should be
    /// counted as a primary-provider failure by the caller.
    pub async fn classify(
        &self,
        model: &str,
        messages: &[NormalizedMessage],
        is_partial_check: bool,
        now_ms: i64,
    ) -> Result<Verdict, ApiError> {
        let body = json!({
            "model": model,
            "temperature": 0,
            "max_tokens": MAX_TOKENS,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system_prompt() },
                { "role": "user", "content": review_prompt(messages) },
                { "role": "user", "content": reinforcement_prompt() },
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream_error_from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or_else(|_| json!({}));
            return Err(ApiError::Upstream {
                status,
                body,
                retryable: status.is_server_error(),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|_| ApiError::ServiceUnavailable {
                reason: "moderation_provider_invalid_response",
            })?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(ApiError::ServiceUnavailable {
                reason: "moderation_provider_empty_response",
            })?;

        let raw: RawVerdict = serde_json::from_str(content).map_err(|_| ApiError::ServiceUnavailable {
            reason: "moderation_provider_invalid_verdict",
        })?;

        // riskLevel == 5 => isViolation, even if the model said otherwise.
        let is_violation = raw.is_violation || raw.risk_level >= 5;

        Ok(Verdict {
            is_violation,
            risk_level: raw.risk_level,
            log_id: log_id(now_ms),
            is_partial_check,
        })
    }
}

fn upstream_error_from_reqwest(err: &reqwest::Error) -> ApiError {
    ApiError::Upstream {
        status: err
            .status()
            .unwrap_or(reqwest::StatusCode::BAD_GATEWAY),
        body: json!({ "message": err.to_string() }),
        retryable: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn msg(role: &str, content: &str) -> NormalizedMessage {
        NormalizedMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn round_robin_cycles_through_models() {
        let selector = ModelSelector::new(
            vec!["a".to_string(), "b".to_string()],
            ModelSelection::RoundRobin,
        );
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(selector.select(&mut rng), Some("a"));
        assert_eq!(selector.select(&mut rng), Some("b"));
        assert_eq!(selector.select(&mut rng), Some("a"));
    }

    #[test]
    fn empty_model_list_selects_none() {
        let selector = ModelSelector::new(vec![], ModelSelection::RoundRobin);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(selector.select(&mut rng), None);
    }

    #[test]
    fn detects_self_loop_sentinel() {
        let messages = vec![
            msg("system", &format!("preamble {SENTINEL} trailer")),
            msg("user", "hi"),
        ];
        assert!(is_self_loop(&messages));
    }

    #[test]
    fn no_sentinel_is_not_a_self_loop() {
        let messages = vec![msg("system", "you are a helpful assistant"), msg("user", "hi")];
        assert!(!is_self_loop(&messages));
    }

    #[test]
    fn whitelist_supports_glob_suffix() {
        let patterns = vec!["gpt-4*".to_string(), "exact-model".to_string()];
        assert!(is_whitelisted("gpt-4o", &patterns));
        assert!(is_whitelisted("exact-model", &patterns));
        assert!(!is_whitelisted("claude-3", &patterns));
    }

    #[test]
    fn log_id_has_expected_shape() {
        let id = log_id(1_700_000_000_000);
        assert!(id.starts_with("mod_1700000000000_"));
        assert_eq!(id.len(), "mod_1700000000000_".len() + 8);
    }

    #[test]
    fn risk_level_five_forces_violation() {
        let raw = RawVerdict {
            is_violation: false,
            risk_level: 5,
        };
        assert!(raw.is_violation || raw.risk_level >= 5);
    }
}
