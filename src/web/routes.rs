//! Router assembly and the shared pre-flight checks common to every route
//! (global burst breaker, rate limiting, auth).

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::rate_limit::{RateLimitVerdict, Route};
use crate::state::AppState;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::{audio, chat, images, models};

/// Builds the full router: `/v1/*` routes plus the ambient middleware stack.
/// Nested routers (`v1`, mounted under a common prefix and layered once at
/// the top) rather than one flat route list.
pub fn create_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    let v1 = Router::new()
        .route("/chat/completions", post(chat::chat_completions))
        .route("/images/generations", post(images::images_generations))
        .route("/audio/transcriptions", post(audio::audio_transcriptions))
        .route("/models", get(models::list_models))
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(app_state);

    Router::new().nest("/v1", v1).layer((
        RequestIdLayer,
        TraceLayer::new_for_http(),
        cors,
    ))
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Auth check shared by every route: `Authorization: Bearer <AUTH_KEY>` must
/// match exactly.
pub fn check_auth(headers: &axum::http::HeaderMap, expected: &str) -> Result<(), ApiError> {
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Auth),
    }
}

/// Global burst breaker check, shared by every route.
pub fn check_burst(state: &AppState) -> Result<(), ApiError> {
    if state.burst_breaker.hit() {
        return Err(ApiError::GlobalBurst);
    }
    Ok(())
}

/// Rate-limit gate, shared by every route. Returns the verdict so the
/// caller can stamp `X-RateLimit-*` headers on success too.
pub fn check_rate_limit(
    state: &AppState,
    route: Route,
    ip: std::net::IpAddr,
) -> Result<RateLimitVerdict, ApiError> {
    let verdict = state.rate_limiter.check(route, ip);
    if verdict.limited {
        return Err(ApiError::RateLimited(verdict));
    }
    Ok(verdict)
}

pub fn invalid_json_body() -> ApiError {
    ApiError::InvalidRequest {
        message: "request body must be valid JSON".to_string(),
    }
}
