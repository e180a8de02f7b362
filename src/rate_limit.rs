//! Multi-tier fixed-window rate limiter.
//!
//! Three independent minute windows are checked on every request:
//! the route as a whole, this IP against this route, and this IP across all
//! routes. Counters are hand-rolled rather than built on a generic limiter
//! crate, since reporting the exact `{limit, remaining, reset}` triple and
//! per-tier breakdown needs direct access to each tier's state: one
//! `DashMap` per tier, guarded read-modify-write via `DashMap::entry`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;

const WINDOW_MS: i64 = 60_000;
const IDLE_RECLAIM_MS: i64 = 5 * 60_000;

/// The four rate-limited route groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Chat,
    Images,
    Audio,
    Models,
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u32,
    window_start_ms: i64,
}

impl Counter {
    fn fresh(now_ms: i64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierInfo {
    pub limit: u32,
    pub count: u32,
    pub limited: bool,
    pub reset: i64,
}

impl TierInfo {
    fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

/// The outcome of checking all three tiers for one request.
#[derive(Debug, Clone)]
pub struct RateLimitVerdict {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset: i64,
    pub path: TierInfo,
    pub ip_path: TierInfo,
    pub global_ip: TierInfo,
}

impl RateLimitVerdict {
    pub fn breakdown(&self) -> serde_json::Value {
        json!({
            "route": self.path,
            "route_ip": self.ip_path,
            "global_ip": self.global_ip,
        })
    }

    /// `X-RateLimit-*` headers. The route tier's limit is reported as the
    /// headline `X-RateLimit-Limit`; remaining/reset are the minimum across
    /// all three tiers.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", self.limit.into());
        headers.insert("x-ratelimit-remaining", self.remaining.into());
        headers.insert("x-ratelimit-reset", self.reset.into());
    }
}

/// Per-route requests-per-minute budgets.
#[derive(Debug, Clone, Copy)]
pub struct RouteLimits {
    pub chat: u32,
    pub images: u32,
    pub audio: u32,
    pub models: u32,
    pub global_ip: u32,
}

impl RouteLimits {
    fn limit_for(&self, route: Route) -> u32 {
        match route {
            Route::Chat => self.chat,
            Route::Images => self.images,
            Route::Audio => self.audio,
            Route::Models => self.models,
        }
    }
}

/// Process-local rate limiter state, shared via `Arc` across the router.
pub struct RateLimiter {
    limits: RouteLimits,
    path_counters: DashMap<Route, Counter>,
    ip_path_counters: DashMap<(IpAddr, Route), Counter>,
    global_ip_counters: DashMap<IpAddr, Counter>,
}

impl RateLimiter {
    pub fn new(limits: RouteLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            path_counters: DashMap::new(),
            ip_path_counters: DashMap::new(),
            global_ip_counters: DashMap::new(),
        })
    }

    /// Checks all three tiers for one request. Exactly one call per inbound
    /// request, before any downstream work.
    pub fn check(&self, route: Route, ip: IpAddr) -> RateLimitVerdict {
        let now_ms = Utc::now().timestamp_millis();
        let route_limit = self.limits.limit_for(route);
        let ip_path_limit = (route_limit as f64 * 0.25).floor() as u32;
        let global_ip_limit = self.limits.global_ip;

        let path = bump(&self.path_counters, route, route_limit, now_ms);
        let ip_path = bump(&self.ip_path_counters, (ip, route), ip_path_limit, now_ms);
        let global_ip = bump(&self.global_ip_counters, ip, global_ip_limit, now_ms);

        let limited = path.limited || ip_path.limited || global_ip.limited;
        let remaining = path.remaining().min(ip_path.remaining()).min(global_ip.remaining());
        let reset = path.reset.min(ip_path.reset).min(global_ip.reset);

        RateLimitVerdict {
            limited,
            limit: route_limit,
            remaining,
            reset,
            path,
            ip_path,
            global_ip,
        }
    }

    /// Background maintenance: expire stale windows and drop IP entries idle
    /// for more than 5 minutes, bounding memory under client churn.
    pub fn sweep(&self) {
        let now_ms = Utc::now().timestamp_millis();

        self.path_counters.retain(|_, c| {
            if now_ms - c.window_start_ms > WINDOW_MS {
                c.count = 0;
                c.window_start_ms = now_ms;
            }
            true
        });

        self.ip_path_counters
            .retain(|_, c| now_ms - c.window_start_ms <= IDLE_RECLAIM_MS);
        self.global_ip_counters
            .retain(|_, c| now_ms - c.window_start_ms <= IDLE_RECLAIM_MS);
    }

    /// Spawns the periodic sweep task, running every 60s.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                state.sweep();
            }
        });
    }
}

fn bump<K: std::hash::Hash + Eq + Clone>(
    map: &DashMap<K, Counter>,
    key: K,
    limit: u32,
    now_ms: i64,
) -> TierInfo {
    let mut entry = map.entry(key).or_insert_with(|| Counter::fresh(now_ms));
    if now_ms - entry.window_start_ms > WINDOW_MS {
        entry.count = 0;
        entry.window_start_ms = now_ms;
    }
    entry.count += 1;
    TierInfo {
        limit,
        count: entry.count,
        limited: entry.count > limit,
        reset: (entry.window_start_ms + WINDOW_MS) / 1000,
    }
}
