//! `POST /v1/chat/completions` -- the core moderated, rate-limited,
//! retry-wrapped, optionally-streamed chat completion route.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};

use crate::error::ApiError;
use crate::forwarder::ChatCompletionRequest;
use crate::moderation::{self, Verdict};
use crate::rate_limit::Route;
use crate::retry::{self, RetryPolicy};
use crate::sampler::{self, NormalizedMessage, RawMessage};
use crate::state::AppState;
use crate::stream_relay;
use crate::web::middleware::client_ip::ClientIp;
use crate::web::routes::{check_auth, check_burst, check_rate_limit, invalid_json_body};

pub async fn chat_completions(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle(state, ip, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(
    state: AppState,
    ip: std::net::IpAddr,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: ChatCompletionRequest =
        serde_json::from_slice(&body).map_err(|_| invalid_json_body())?;

    check_burst(&state)?;

    let rl_verdict = check_rate_limit(&state, Route::Chat, ip)?;
    check_auth(&headers, &state.config.auth_key)?;
    request.validate()?;

    let raw_messages: Vec<RawMessage> =
        serde_json::from_value(request.messages.clone()).map_err(|_| invalid_json_body())?;
    let normalized = sampler::normalize(raw_messages);

    let self_loop = moderation::is_self_loop(&normalized);
    let whitelisted = moderation::is_whitelisted(
        &request.model,
        &state.config.whitelisted_model_patterns(),
    );

    let mod_verdict = if self_loop || whitelisted {
        None
    } else {
        Some(run_moderation(&state, normalized).await?)
    };

    if !state.circuit_breaker.allow() {
        return Err(ApiError::CircuitOpen);
    }

    let policy = RetryPolicy {
        enable_retry: state.config.enable_retry,
        max_retry_time: state.config.max_retry_time(),
        retry_delay: state.config.retry_delay(),
        max_retry_count: state.config.max_retry_count,
    };

    if request.stream {
        let forwarder = state.forwarder.clone();
        let req = &request;
        let upstream = retry::retry(policy, || forwarder.send_stream(req)).await;
        let upstream = match upstream {
            Ok(response) => response,
            Err(err) => {
                state.circuit_breaker.record_failure();
                return Err(err);
            }
        };

        let body = stream_relay::relay(upstream, state.config.stream_timeout());
        let mut response = Response::new(body);
        stream_relay::sse_headers(&mut response);
        if let Some(verdict) = &mod_verdict {
            stream_relay::apply_moderation_headers(&mut response, verdict);
        }
        rl_verdict.apply_headers(response.headers_mut());
        Ok(response)
    } else {
        let forwarder = state.forwarder.clone();
        let req = &request;
        let body = retry::retry(policy, || forwarder.send_unary(req)).await;
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                state.circuit_breaker.record_failure();
                return Err(err);
            }
        };

        let mut response = Json(body).into_response();
        rl_verdict.apply_headers(response.headers_mut());
        if let Some(verdict) = &mod_verdict {
            stream_relay::apply_moderation_headers(&mut response, verdict);
        }
        Ok(response)
    }
}

async fn run_moderation(state: &AppState, normalized: Vec<NormalizedMessage>) -> Result<Verdict, ApiError> {
    if !state.circuit_breaker.allow() {
        return Err(ApiError::CircuitOpen);
    }

    let mut rng = rand::rng();
    let sample_result = sampler::sample(normalized, &mut rng);

    let model = state
        .model_selector
        .select(&mut rng)
        .map(str::to_string)
        .ok_or(ApiError::ServiceUnavailable {
            reason: "no_moderation_models_configured",
        })?;

    let now_ms = chrono::Utc::now().timestamp_millis();

    match state
        .moderation
        .classify(&model, &sample_result.messages, sample_result.is_partial_check, now_ms)
        .await
    {
        Ok(verdict) => {
            if verdict.is_violation {
                Err(ApiError::ContentViolation {
                    risk_level: verdict.risk_level,
                    log_id: verdict.log_id,
                    is_partial_check: verdict.is_partial_check,
                })
            } else {
                Ok(verdict)
            }
        }
        Err(err) => {
            state.circuit_breaker.record_failure();
            Err(err)
        }
    }
}

