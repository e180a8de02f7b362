//! Uniform error taxonomy.
//!
//! A tagged sum type that encodes retry policy and HTTP status intrinsically,
//! rather than an ad-hoc `{error: {...}, nonRetryable, originalResponse}`
//! shape. Every variant knows how to render itself through [`IntoResponse`]
//! as a JSON error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::rate_limit::RateLimitVerdict;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid Authorization header")]
    Auth,

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("content violation (risk level {risk_level})")]
    ContentViolation {
        risk_level: u8,
        log_id: String,
        is_partial_check: bool,
    },

    #[error("rate limit exceeded")]
    RateLimited(RateLimitVerdict),

    #[error("upstream provider error: {status}")]
    Upstream {
        status: StatusCode,
        body: serde_json::Value,
        /// Whether the retry engine is allowed to retry this failure.
        retryable: bool,
    },

    #[error("o3 models require temperature=0")]
    InvalidTemperature,

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("global request burst breaker tripped")]
    GlobalBurst,

    #[error("stream inactivity timeout")]
    StreamTimeout,

    #[error("service unavailable: {reason}")]
    ServiceUnavailable { reason: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Whether the retry engine may attempt this call again.
    ///
    /// Auth, validation, content-violation, and rate-limit errors are never
    /// retried; a 4xx `Upstream` error is treated as a client/policy
    /// rejection (non-retryable) while a 5xx or network failure is
    /// retryable when the caller's config allows it.
    pub fn retryable(&self) -> bool {
        match self {
            ApiError::Upstream { retryable, .. } => *retryable,
            _ => false,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Auth => "authentication_error",
            ApiError::InvalidRequest { .. }
            | ApiError::MethodNotAllowed
            | ApiError::InvalidTemperature => "invalid_request_error",
            ApiError::ContentViolation { .. } => "invalid_request_error",
            ApiError::RateLimited(_) => "rate_limit_error",
            ApiError::Upstream { .. } => "api_error",
            ApiError::CircuitOpen | ApiError::ServiceUnavailable { .. } => "service_error",
            ApiError::GlobalBurst => "rate_limit_error",
            ApiError::StreamTimeout => "api_error",
            ApiError::Internal(_) => "api_error",
        }
    }

    fn error_code(&self) -> serde_json::Value {
        match self {
            ApiError::Auth => json!("invalid_auth_key"),
            ApiError::InvalidRequest { .. } => json!("invalid_request"),
            ApiError::MethodNotAllowed => json!("method_not_allowed"),
            ApiError::ContentViolation { .. } => json!("content_violation"),
            ApiError::RateLimited(_) => json!("rate_limit_exceeded"),
            ApiError::Upstream { status, .. } => json!(status.as_u16()),
            ApiError::InvalidTemperature => json!("invalid_temperature"),
            ApiError::CircuitOpen => json!("service_unavailable"),
            ApiError::GlobalBurst => json!("global_circuit_breaker_tripped"),
            ApiError::StreamTimeout => json!("stream_timeout"),
            ApiError::ServiceUnavailable { .. } => json!("service_unavailable"),
            ApiError::Internal(_) => json!("internal_error"),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest { .. } | ApiError::InvalidTemperature => {
                StatusCode::BAD_REQUEST
            }
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::ContentViolation { .. } => StatusCode::FORBIDDEN,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream { status, .. } => *status,
            ApiError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::GlobalBurst => StatusCode::TOO_MANY_REQUESTS,
            ApiError::StreamTimeout => StatusCode::OK, // only ever emitted in-band over SSE
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error envelope body, shared between the HTTP `IntoResponse` path
    /// and the in-band SSE error frame.
    pub fn envelope(&self) -> serde_json::Value {
        let mut error = json!({
            "message": self.to_string(),
            "type": self.error_type(),
            "code": self.error_code(),
        });

        let details = match self {
            ApiError::ContentViolation {
                risk_level,
                log_id,
                is_partial_check,
            } => Some(json!({
                "riskLevel": risk_level,
                "logId": log_id,
                "isPartialCheck": is_partial_check,
            })),
            ApiError::RateLimited(verdict) => Some(json!({
                "tiers": verdict.breakdown(),
            })),
            ApiError::CircuitOpen => Some(json!({ "circuit_breaker": true })),
            ApiError::Upstream { body, .. } => Some(body.clone()),
            _ => None,
        };

        if let (Some(obj), Some(details)) = (error.as_object_mut(), details) {
            obj.insert("details".to_string(), details);
        }

        json!({ "error": error })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.envelope())).into_response();

        if let ApiError::RateLimited(verdict) = &self {
            verdict.apply_headers(response.headers_mut());
        }
        if let ApiError::CircuitOpen = &self {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("60"));
        }

        response
    }
}
