//! `GET /v1/models` -- straight authenticated proxy.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};

use crate::error::ApiError;
use crate::rate_limit::Route;
use crate::state::AppState;
use crate::web::middleware::client_ip::ClientIp;
use crate::web::routes::{check_auth, check_burst, check_rate_limit};

pub async fn list_models(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
) -> Response {
    match handle(state, ip, headers).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle(state: AppState, ip: std::net::IpAddr, headers: HeaderMap) -> Result<Response, ApiError> {
    check_burst(&state)?;
    let rl_verdict = check_rate_limit(&state, Route::Models, ip)?;
    check_auth(&headers, &state.config.auth_key)?;

    let result = state.forwarder.proxy_get("/models").await?;

    let mut response = Json(result).into_response();
    rl_verdict.apply_headers(response.headers_mut());
    Ok(response)
}
