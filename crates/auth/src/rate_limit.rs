//! Sliding-window request counter keyed by client and route class.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Which limit applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    Login,
    Api,
}

impl RouteClass {
    /// Classify a request path; `None` bypasses rate limiting.
    pub fn for_path(path: &str) -> Option<Self> {
        if path == "/api/v1/auth/login" || path == "/api/auth/login" {
            Some(RouteClass::Login)
        } else if path.starts_with("/api/") {
            Some(RouteClass::Api)
        } else {
            None
        }
    }

    pub fn key_prefix(&self) -> &'static str {
        match self {
            RouteClass::Login => "login",
            RouteClass::Api => "api",
        }
    }

    /// Bucket key for a client under this class, e.g. `login:10.0.0.7`.
    pub fn bucket_key(&self, client: &str) -> String {
        format!("{}:{}", self.key_prefix(), client)
    }
}

/// Limit and window for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window: Duration,
}

/// Limits per route class. `Default`: login 5/min, API 100/min.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub login: RateLimitRule,
    pub api: RateLimitRule,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login: RateLimitRule {
                limit: 5,
                window: Duration::minutes(1),
            },
            api: RateLimitRule {
                limit: 100,
                window: Duration::minutes(1),
            },
        }
    }
}

impl RateLimits {
    pub fn rule_for(&self, class: RouteClass) -> RateLimitRule {
        match class {
            RouteClass::Login => self.login,
            RouteClass::Api => self.api,
        }
    }

    /// Longest configured window; buckets idle for longer can be evicted.
    pub fn longest_window(&self) -> Duration {
        self.login.window.max(self.api.window)
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub exceeded: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitStatus {
    /// Whole seconds until `reset_at`, at least one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// In-memory sliding-window limiter shared by every request.
///
/// One exclusive lock covers the whole key space; it is held only for
/// pruning one bucket, never across I/O.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitStatus {
        self.check_at(key, limit, window, Utc::now())
    }

    /// Prune the bucket to the trailing window, then admit and record `now`
    /// unless `limit` requests already fall inside it.
    pub fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RateLimitStatus {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(key.to_string()).or_default();

        let cutoff = now - window;
        while bucket.front().is_some_and(|t| *t <= cutoff) {
            bucket.pop_front();
        }

        let count = bucket.len() as u32;
        if count >= limit {
            let reset_at = bucket.front().map_or(now + window, |oldest| *oldest + window);
            return RateLimitStatus {
                exceeded: true,
                limit,
                remaining: 0,
                reset_at,
            };
        }

        bucket.push_back(now);
        let oldest = bucket.front().copied().unwrap_or(now);
        RateLimitStatus {
            exceeded: false,
            limit,
            remaining: limit - count - 1,
            reset_at: oldest + window,
        }
    }

    /// Drop buckets whose newest request is older than `max_window`.
    ///
    /// Such buckets would be emptied by the next check anyway, so eviction
    /// does not change limiting behaviour. Returns how many were removed.
    pub fn sweep_idle_at(&self, now: DateTime<Utc>, max_window: Duration) -> usize {
        let cutoff = now - max_window;
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.back().is_some_and(|newest| *newest > cutoff));
        before - buckets.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
