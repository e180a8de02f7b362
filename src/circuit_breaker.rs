//! Circuit breakers: the per-provider breaker and the global burst breaker.
//! Both are plain `Mutex`-guarded state machines -- unlike the rate limiter
//! they don't sit on the inbound routing path, so no `tower::Layer` is
//! needed; callers invoke `allow()`/`record_failure()` directly around the
//! moderation and primary-provider calls.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const TRIP_DURATION: Duration = Duration::from_secs(60);

/// Per-primary-provider failure-window breaker.
///
/// The moderation provider has no breaker of its own: `allow()` is also
/// consulted before moderation calls, so the moderation path is considered
/// unavailable whenever the primary breaker is tripped, declining to spend
/// moderation budget when the primary can't serve anyway.
pub struct CircuitBreaker {
    max_errors: u32,
    error_window: Duration,
    inner: Mutex<BreakerState>,
}

struct BreakerState {
    failure_count: u32,
    last_failure: Option<Instant>,
    tripped: bool,
    reset_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(max_errors: u32, error_window: Duration) -> Self {
        Self {
            max_errors,
            error_window,
            inner: Mutex::new(BreakerState {
                failure_count: 0,
                last_failure: None,
                tripped: false,
                reset_at: None,
            }),
        }
    }

    /// False while tripped and before the reset time; lazily clears the
    /// trip once the cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut state = self.inner.lock().unwrap();
        self.lazy_clear(&mut state, Instant::now());
        !state.tripped
    }

    /// Records a call failure, tripping the breaker once `failure_count`
    /// exceeds `max_errors` within `error_window`.
    pub fn record_failure(&self) {
        let mut state = self.inner.lock().unwrap();
        let now = Instant::now();
        self.lazy_clear(&mut state, now);

        if let Some(last) = state.last_failure
            && now.duration_since(last) > self.error_window
        {
            state.failure_count = 0;
        }

        state.failure_count += 1;
        state.last_failure = Some(now);

        if state.failure_count > self.max_errors {
            state.tripped = true;
            state.reset_at = Some(now + TRIP_DURATION);
            state.failure_count = 0;
        }
    }

    /// Background tick (every 10s) performing the same lazy clear, so a
    /// breaker that's gone quiet resets even without traffic.
    pub fn tick(&self) {
        let mut state = self.inner.lock().unwrap();
        self.lazy_clear(&mut state, Instant::now());
    }

    pub fn is_tripped(&self) -> bool {
        let mut state = self.inner.lock().unwrap();
        self.lazy_clear(&mut state, Instant::now());
        state.tripped
    }

    fn lazy_clear(&self, state: &mut BreakerState, now: Instant) {
        if state.tripped
            && let Some(reset_at) = state.reset_at
            && now >= reset_at
        {
            state.tripped = false;
            state.reset_at = None;
            state.failure_count = 0;
        }
        if !state.tripped
            && let Some(last) = state.last_failure
            && now.duration_since(last) > self.error_window
        {
            state.failure_count = 0;
        }
    }
}

/// Process-wide request-burst breaker: trips when the global request rate
/// exceeds a fixed threshold, independent of the per-route rate limiter.
pub struct GlobalBurstBreaker {
    threshold_per_sec: u32,
    inner: Mutex<BurstState>,
}

struct BurstState {
    count: u32,
    window_start: Instant,
    tripped: bool,
    reset_at: Option<Instant>,
}

impl GlobalBurstBreaker {
    pub fn new(threshold_per_sec: u32) -> Self {
        Self {
            threshold_per_sec,
            inner: Mutex::new(BurstState {
                count: 0,
                window_start: Instant::now(),
                tripped: false,
                reset_at: None,
            }),
        }
    }

    /// Increments the per-second counter and reports whether the breaker is
    /// (now) tripped. Called once per inbound request at the dispatcher.
    pub fn hit(&self) -> bool {
        let mut state = self.inner.lock().unwrap();
        let now = Instant::now();

        if let Some(reset_at) = state.reset_at
            && now >= reset_at
        {
            state.tripped = false;
            state.reset_at = None;
            state.count = 0;
            state.window_start = now;
        }

        if state.tripped {
            return true;
        }

        if now.duration_since(state.window_start) > Duration::from_secs(1) {
            state.count = 0;
            state.window_start = now;
        }

        state.count += 1;
        if state.count > self.threshold_per_sec {
            state.tripped = true;
            state.reset_at = Some(now + TRIP_DURATION);
            return true;
        }

        false
    }
}

impl Default for GlobalBurstBreaker {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_max_errors_exceeded() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            breaker.record_failure();
            assert!(breaker.allow());
        }
        breaker.record_failure();
        assert!(!breaker.allow());
    }

    #[test]
    fn allow_is_true_before_any_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow());
    }

    #[test]
    fn global_burst_breaker_allows_under_threshold() {
        let breaker = GlobalBurstBreaker::new(5);
        for _ in 0..5 {
            assert!(!breaker.hit());
        }
    }

    #[test]
    fn global_burst_breaker_trips_over_threshold() {
        let breaker = GlobalBurstBreaker::new(2);
        assert!(!breaker.hit());
        assert!(!breaker.hit());
        assert!(breaker.hit());
        // Stays tripped on subsequent calls within the cooldown.
        assert!(breaker.hit());
    }
}
