//! End-to-end scenarios against a router wired to stubbed moderation/primary
//! providers via `wiremock`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modgate::config::Config;
use modgate::state::AppState;
use modgate::web::create_router;

fn base_config(moderation_url: String, primary_url: String) -> Config {
    Config {
        auth_key: "test-key".to_string(),
        first_provider_url: moderation_url,
        first_provider_key: "mod-key".to_string(),
        first_provider_models: "mod-model".to_string(),
        second_provider_url: primary_url,
        second_provider_key: "primary-key".to_string(),
        max_retry_time: 2_000,
        retry_delay: 10,
        stream_timeout: 1_000,
        max_retry_count: 2,
        enable_retry: true,
        chat_rpm: 1_000,
        images_rpm: 1_000,
        audio_rpm: 1_000,
        models_rpm: 1_000,
        global_ip_rpm: 1_000,
        max_provider_errors: 3,
        provider_error_window: 60_000,
        whitelisted_models: String::new(),
        port: 0,
        log_level: "error".to_string(),
    }
}

async fn moderation_ok(server: &MockServer, is_violation: bool, risk_level: u8) {
    let verdict = json!({"isViolation": is_violation, "riskLevel": risk_level});
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": verdict.to_string()}}]
        })))
        .mount(server)
        .await;
}

fn chat_request(body: serde_json::Value, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        // The test harness drives the router with `oneshot`, which never
        // populates `ConnectInfo`, so the client-IP extractor needs a
        // trusted-proxy header to resolve an address.
        .header("x-forwarded-for", "203.0.113.10");
    if let Some(token) = auth {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn auth_missing_returns_401() {
    let moderation = MockServer::start().await;
    let primary = MockServer::start().await;
    let state = AppState::new(base_config(moderation.uri(), primary.uri()));
    let router = create_router(state);

    let req = chat_request(json!({"model": "gpt-4", "messages": []}), None);
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["type"], "authentication_error");
    assert_eq!(value["error"]["code"], "invalid_auth_key");
}

#[tokio::test]
async fn happy_unary_path_returns_completion_with_risk_header() {
    let moderation = MockServer::start().await;
    let primary = MockServer::start().await;
    moderation_ok(&moderation, false, 1).await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
        })))
        .mount(&primary)
        .await;

    let state = AppState::new(base_config(moderation.uri(), primary.uri()));
    let router = create_router(state);

    let req = chat_request(
        json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}], "stream": false}),
        Some("test-key"),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-risk-level").unwrap(), "1");
    assert!(resp.headers().get("x-ratelimit-remaining").is_some());
}

#[tokio::test]
async fn o3_model_requires_zero_temperature() {
    let moderation = MockServer::start().await;
    let primary = MockServer::start().await;
    // No mocks registered on either server -- the request must be rejected
    // before any upstream call is made.

    let state = AppState::new(base_config(moderation.uri(), primary.uri()));
    let router = create_router(state);

    let req = chat_request(
        json!({"model": "o3-mini", "messages": [], "temperature": 0.7}),
        Some("test-key"),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["code"], "invalid_temperature");
}

#[tokio::test]
async fn moderation_loop_sentinel_skips_moderation_and_reaches_primary() {
    let moderation = MockServer::start().await;
    let primary = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&moderation)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        })))
        .mount(&primary)
        .await;

    let state = AppState::new(base_config(moderation.uri(), primary.uri()));
    let router = create_router(state);

    let sentinel = modgate::moderation::SENTINEL;
    let req = chat_request(
        json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": sentinel},
                {"role": "user", "content": "hi"}
            ]
        }),
        Some("test-key"),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    moderation.verify().await;
}

#[tokio::test]
async fn moderation_violation_rejects_before_reaching_primary() {
    let moderation = MockServer::start().await;
    let primary = MockServer::start().await;
    moderation_ok(&moderation, true, 9).await;

    // No mock mounted on `primary` and no expectation set beyond zero calls --
    // `verify()` below fails the test if the primary is ever hit.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&primary)
        .await;

    let state = AppState::new(base_config(moderation.uri(), primary.uri()));
    let router = create_router(state);

    let req = chat_request(
        json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        }),
        Some("test-key"),
    );
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["code"], "content_violation");
    assert_eq!(value["error"]["details"]["riskLevel"], 9);

    primary.verify().await;
}

#[tokio::test]
async fn rate_limit_second_burst_returns_429() {
    let moderation = MockServer::start().await;
    let primary = MockServer::start().await;
    moderation_ok(&moderation, false, 1).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}}]
        })))
        .mount(&primary)
        .await;

    let mut config = base_config(moderation.uri(), primary.uri());
    config.chat_rpm = 2;
    let state = AppState::new(config);
    let router = create_router(state);

    let make_req = || {
        chat_request(
            json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]}),
            Some("test-key"),
        )
    };

    let first = router.clone().oneshot(make_req()).await.unwrap();
    let second = router.clone().oneshot(make_req()).await.unwrap();
    let third = router.clone().oneshot(make_req()).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third.headers().get("x-ratelimit-remaining").unwrap(), "0");
}

#[tokio::test]
async fn breaker_trips_after_repeated_primary_failures() {
    let moderation = MockServer::start().await;
    let primary = MockServer::start().await;
    moderation_ok(&moderation, false, 1).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&primary)
        .await;

    let mut config = base_config(moderation.uri(), primary.uri());
    config.max_provider_errors = 3;
    config.provider_error_window = 60_000;
    config.enable_retry = false;
    let state = AppState::new(config);
    let router = create_router(state);

    let make_req = || {
        chat_request(
            json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]}),
            Some("test-key"),
        )
    };

    for _ in 0..4 {
        let resp = router.clone().oneshot(make_req()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    let fifth = router.clone().oneshot(make_req()).await.unwrap();
    assert_eq!(fifth.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = fifth.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["details"]["circuit_breaker"], true);
}
