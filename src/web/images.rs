//! `POST /v1/images/generations` -- straight authenticated proxy, out of
//! scope beyond rate limiting and error formatting.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};

use crate::error::ApiError;
use crate::rate_limit::Route;
use crate::state::AppState;
use crate::web::middleware::client_ip::ClientIp;
use crate::web::routes::{check_auth, check_burst, check_rate_limit, invalid_json_body};

pub async fn images_generations(
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
    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|_| invalid_json_body())?;
    check_burst(&state)?;
    let rl_verdict = check_rate_limit(&state, Route::Images, ip)?;
    check_auth(&headers, &state.config.auth_key)?;

    let result = state
        .forwarder
        .proxy_json("/images/generations", &payload)
        .await?;

    let mut response = Json(result).into_response();
    rl_verdict.apply_headers(response.headers_mut());
    Ok(response)
}
