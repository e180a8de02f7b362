//! Application state shared across the router: the rate limiter, both
//! circuit breakers, the moderation and forwarding clients, and the shared
//! HTTP client, wired together via dependency injection rather than
//! module-level globals.

use std::sync::Arc;

use reqwest::Client;

use crate::circuit_breaker::{CircuitBreaker, GlobalBurstBreaker};
use crate::config::Config;
use crate::forwarder::Forwarder;
use crate::moderation::{ModelSelection, ModelSelector, ModerationClient};
use crate::rate_limit::{RateLimiter, RouteLimits};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub burst_breaker: Arc<GlobalBurstBreaker>,
    pub moderation: Arc<ModerationClient>,
    pub model_selector: Arc<ModelSelector>,
    pub forwarder: Arc<Forwarder>,
    pub proxy_client: Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let rate_limiter = RateLimiter::new(RouteLimits {
            chat: config.chat_rpm,
            images: config.images_rpm,
            audio: config.audio_rpm,
            models: config.models_rpm,
            global_ip: config.global_ip_rpm,
        });
        rate_limiter.spawn_sweeper();

        let circuit_breaker = Arc::new(CircuitBreaker::new(
            config.max_provider_errors,
            config.provider_error_window(),
        ));
        spawn_breaker_tick(circuit_breaker.clone());

        let burst_breaker = Arc::new(GlobalBurstBreaker::default());

        let http = Client::builder()
            .build()
            .expect("building the shared reqwest client must not fail");

        let moderation = Arc::new(ModerationClient::new(
            http.clone(),
            config.first_provider_url.clone(),
            config.first_provider_key.clone(),
            config.attempt_timeout(),
        ));

        let model_selector = Arc::new(ModelSelector::new(
            config.moderation_models(),
            ModelSelection::RoundRobin,
        ));

        let forwarder = Arc::new(Forwarder::new(
            http.clone(),
            config.second_provider_url.clone(),
            config.second_provider_key.clone(),
            config.attempt_timeout(),
        ));

        Self {
            config,
            rate_limiter,
            circuit_breaker,
            burst_breaker,
            moderation,
            model_selector,
            forwarder,
            proxy_client: http,
        }
    }
}

fn spawn_breaker_tick(breaker: Arc<CircuitBreaker>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            ticker.tick().await;
            breaker.tick();
        }
    });
}
