//! Streaming relay.
//!
//! Tunnels SSE bytes from the primary provider's streaming response straight
//! through to the client, watching for inactivity and framing errors
//! in-band rather than severing the connection abruptly.
//!
//! A single `futures::stream::unfold` state machine rather than a
//! callback-driven reader; the watchdog is just a `tokio::time::timeout`
//! wrapped around each upstream read, so there's no separate task to cancel
//! when the client disconnects -- dropping the response body stream drops
//! the upstream connection too.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use futures::{Stream, StreamExt};

use crate::error::ApiError;
use crate::moderation::Verdict;

const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Builds the SSE response headers carrying moderation metadata, which must
/// be set before the first byte of the relayed body is written.
pub fn apply_moderation_headers(response: &mut Response, verdict: &Verdict) {
    let headers = response.headers_mut();
    headers.insert(
        "x-content-review-id",
        HeaderValue::from_str(&verdict.log_id).unwrap_or(HeaderValue::from_static("unknown")),
    );
    headers.insert(
        "x-risk-level",
        HeaderValue::from_str(&verdict.risk_level.to_string()).expect("decimal digit is valid ASCII"),
    );
    if verdict.is_partial_check {
        headers.insert("x-content-review-partial", HeaderValue::from_static("true"));
    }
}

pub fn sse_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("text/event-stream"));
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
}

/// Builds the relayed `Body` from the upstream streaming response.
///
/// This proxy always appends `data: [DONE]\n\n` unless the upstream's own
/// bytes already ended with one, since some OpenAI-compatible clients hang
/// waiting for it.
pub fn relay(upstream: reqwest::Response, inactivity_timeout: Duration) -> Body {
    let byte_stream = upstream.bytes_stream();
    Body::from_stream(frame_stream(byte_stream, inactivity_timeout))
}

fn frame_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    inactivity_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    futures::stream::unfold(
        (Box::pin(byte_stream), false, false),
        move |(mut upstream, done_seen, finished)| async move {
            if finished {
                return None;
            }

            match tokio::time::timeout(inactivity_timeout, upstream.next()).await {
                Ok(Some(Ok(bytes))) => {
                    let saw_done = done_seen || contains_done_marker(&bytes);
                    Some((Ok(bytes), (upstream, saw_done, false)))
                }
                Ok(Some(Err(e))) => {
                    let frame = error_frame(&ApiError::Upstream {
                        status: StatusCode::BAD_GATEWAY,
                        body: serde_json::json!({ "message": e.to_string() }),
                        retryable: false,
                    });
                    Some((Ok(frame), (upstream, true, true)))
                }
                Ok(None) => {
                    if done_seen {
                        None
                    } else {
                        Some((Ok(Bytes::from_static(DONE_FRAME)), (upstream, true, true)))
                    }
                }
                Err(_elapsed) => {
                    let frame = error_frame(&ApiError::StreamTimeout);
                    Some((Ok(frame), (upstream, true, true)))
                }
            }
        },
    )
}

fn contains_done_marker(bytes: &[u8]) -> bool {
    bytes
        .windows(b"[DONE]".len())
        .any(|window| window == b"[DONE]")
}

/// Renders an in-band SSE error frame followed by `[DONE]`, so the client's
/// stream always terminates cleanly even on failure.
fn error_frame(err: &ApiError) -> Bytes {
    let mut out = format!("data: {}\n\n", err.envelope());
    out.push_str("data: [DONE]\n\n");
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn appends_done_when_upstream_omits_it() {
        let chunks: Vec<reqwest::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"data: {\"x\":1}\n\n"))];
        let stream = frame_stream(stream::iter(chunks), Duration::from_secs(5));
        let collected: Vec<_> = stream.collect().await;
        let joined: Vec<u8> = collected
            .into_iter()
            .flat_map(|r| r.unwrap().to_vec())
            .collect();
        let text = String::from_utf8(joined).unwrap();
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn does_not_double_append_done() {
        let chunks: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from_static(DONE_FRAME))];
        let stream = frame_stream(stream::iter(chunks), Duration::from_secs(5));
        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 1);
    }

    #[tokio::test]
    async fn inactivity_timeout_emits_error_and_done() {
        let stream = frame_stream(
            stream::pending::<reqwest::Result<Bytes>>(),
            Duration::from_millis(10),
        );
        let collected: Vec<_> = stream.collect().await;
        let joined: Vec<u8> = collected
            .into_iter()
            .flat_map(|r| r.unwrap().to_vec())
            .collect();
        let text = String::from_utf8(joined).unwrap();
        assert!(text.contains("stream_timeout"));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }
}
