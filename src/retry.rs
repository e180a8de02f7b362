//! Retry engine: bounded retry with capped exponential backoff, wrapping
//! only the primary-provider call.
//!
//! A generic loop-and-sleep wrapper around a fallible async call, using a
//! `retryDelay * 1.5^(n-1)` backoff formula rather than `2^n`, with a
//! disable flag and a non-retryable short-circuit.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub enable_retry: bool,
    pub max_retry_time: Duration,
    pub retry_delay: Duration,
    pub max_retry_count: u32,
}

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Delay before the `retry_count`-th retry (1-indexed), capped at 10s.
fn backoff_delay(retry_delay: Duration, retry_count: u32) -> Duration {
    let factor = 1.5f64.powi(retry_count as i32 - 1);
    let millis = (retry_delay.as_millis() as f64 * factor) as u64;
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Runs `attempt` (a factory producing a fresh future per try, since a
/// `reqwest` request builder can't be replayed) under the retry policy.
/// Returns the first success, or the last error once the loop exhausts
/// either the attempt count or the total time budget.
pub async fn retry<F, Fut, T>(policy: RetryPolicy, mut attempt: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let start = Instant::now();
    let mut retry_count = 0u32;

    loop {
        let result = attempt().await;

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !policy.enable_retry || !err.retryable() {
            return Err(err);
        }

        let elapsed = start.elapsed();
        if retry_count >= policy.max_retry_count
            || elapsed + policy.retry_delay >= policy.max_retry_time
        {
            return Err(err);
        }

        retry_count += 1;
        let delay = backoff_delay(policy.retry_delay, retry_count);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn upstream_5xx() -> ApiError {
        ApiError::Upstream {
            status: StatusCode::BAD_GATEWAY,
            body: serde_json::json!({}),
            retryable: true,
        }
    }

    fn upstream_4xx() -> ApiError {
        ApiError::Upstream {
            status: StatusCode::BAD_REQUEST,
            body: serde_json::json!({}),
            retryable: false,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            enable_retry: true,
            max_retry_time: Duration::from_secs(5),
            retry_delay: Duration::from_millis(1),
            max_retry_count: 3,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result = retry(fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ApiError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_count_then_fails() {
        let calls = AtomicU32::new(0);
        let result = retry(fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(upstream_5xx())
        })
        .await;
        assert!(result.is_err());
        // initial attempt + 3 retries = 4 total
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn disabled_retry_makes_exactly_one_attempt() {
        let calls = AtomicU32::new(0);
        let mut policy = fast_policy();
        policy.enable_retry = false;
        let result = retry(policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(upstream_5xx())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result = retry(fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(upstream_4xx())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1500));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2250));
        assert_eq!(backoff_delay(base, 10), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry(fast_policy(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(upstream_5xx())
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
