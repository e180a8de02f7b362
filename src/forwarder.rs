//! Forwards chat completion requests to the primary provider.
//!
//! The request body is reconstructed from the client's decoded JSON rather
//! than forwarded byte-for-byte, since this layer validates and defaults
//! fields (temperature constraint, default `max_tokens`) before sending.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Value,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub response_format: Option<Value>,
    pub tools: Option<Value>,
}

impl ChatCompletionRequest {
    /// o3-family models require `temperature == 0`; a violation is a
    /// non-retryable 400, never forwarded downstream.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.model.to_lowercase().contains("o3") && self.temperature != Some(0.0) {
            return Err(ApiError::InvalidTemperature);
        }
        Ok(())
    }

    fn downstream_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.messages,
            "stream": self.stream,
            "max_tokens": self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        let obj = body.as_object_mut().expect("object literal");
        if let Some(temperature) = self.temperature {
            obj.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(response_format) = &self.response_format {
            obj.insert("response_format".to_string(), response_format.clone());
        }
        if let Some(tools) = &self.tools {
            obj.insert("tools".to_string(), tools.clone());
        }
        body
    }
}

pub struct Forwarder {
    http: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(http: Client, base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            api_key,
            timeout,
        }
    }

    /// Unary path: decode the JSON response body and return it whole. On
    /// failure, the upstream `{status, body}` is preserved on the error so
    /// the formatter can pass it through.
    pub async fn send_unary(&self, request: &ChatCompletionRequest) -> Result<Value, ApiError> {
        let response = self.post(request).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(self.upstream_error(status, response).await);
        }

        response.json::<Value>().await.map_err(|_| ApiError::Upstream {
            status,
            body: json!({ "message": "invalid JSON from primary provider" }),
            retryable: false,
        })
    }

    /// Streaming path: on a non-2xx response, buffer and surface the
    /// provider's error; otherwise hand the still-open response to the relay.
    pub async fn send_stream(&self, request: &ChatCompletionRequest) -> Result<Response, ApiError> {
        let response = self.post(request).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(self.upstream_error(status, response).await);
        }

        Ok(response)
    }

    /// Straight authenticated passthrough for the images/audio endpoints.
    /// No moderation, no retry.
    pub async fn proxy_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Upstream {
                status: e.status().unwrap_or(StatusCode::BAD_GATEWAY),
                body: json!({ "message": e.to_string() }),
                retryable: false,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.upstream_error(status, response).await);
        }

        response.json::<Value>().await.map_err(|_| ApiError::Upstream {
            status,
            body: json!({ "message": "invalid JSON from primary provider" }),
            retryable: false,
        })
    }

    /// Straight authenticated passthrough for `GET /v1/models`.
    pub async fn proxy_get(&self, path: &str) -> Result<Value, ApiError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ApiError::Upstream {
                status: e.status().unwrap_or(StatusCode::BAD_GATEWAY),
                body: json!({ "message": e.to_string() }),
                retryable: false,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.upstream_error(status, response).await);
        }

        response.json::<Value>().await.map_err(|_| ApiError::Upstream {
            status,
            body: json!({ "message": "invalid JSON from primary provider" }),
            retryable: false,
        })
    }

    async fn post(&self, request: &ChatCompletionRequest) -> Result<Response, ApiError> {
        self.http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request.downstream_body())
            .send()
            .await
            .map_err(|e| ApiError::Upstream {
                status: e.status().unwrap_or(StatusCode::BAD_GATEWAY),
                body: json!({ "message": e.to_string() }),
                retryable: true,
            })
    }

    /// 4xx responses are passed through verbatim; 5xx responses are
    /// remapped to a fixed gateway status since the provider's own status
    /// line isn't meaningful to the client of this proxy.
    async fn upstream_error(&self, status: StatusCode, response: Response) -> ApiError {
        let body = response
            .json::<Value>()
            .await
            .unwrap_or_else(|_| json!({ "message": "non-JSON error body from primary provider" }));
        let client_status = if status.is_server_error() {
            StatusCode::BAD_GATEWAY
        } else {
            status
        };
        ApiError::Upstream {
            status: client_status,
            body,
            retryable: status.is_server_error(),
        }
    }
}
