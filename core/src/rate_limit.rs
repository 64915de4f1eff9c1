//! Per-user fixed-window token buckets.
//!
//! State lives in the current process only.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the bucket refills. Zero for the disabled sentinel.
    pub reset_after: Duration,
}

impl RateLimitInfo {
    /// Returned by a disabled limiter.
    pub const UNLIMITED: RateLimitInfo = RateLimitInfo {
        limit: u32::MAX,
        remaining: u32::MAX,
        reset_after: Duration::ZERO,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub info: RateLimitInfo,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    window_start: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            limit: config.requests_per_window,
            window: config.window(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    pub fn check(&self, user: &str) -> RateDecision {
        self.check_at(user, Instant::now())
    }

    /// [`RateLimiter::check`] against an explicit clock.
    pub fn check_at(&self, user: &str, now: Instant) -> RateDecision {
        if !self.enabled {
            return RateDecision {
                allowed: true,
                info: RateLimitInfo::UNLIMITED,
            };
        }

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let idle_cutoff = self.window * 2;
        buckets.retain(|_, b| now.saturating_duration_since(b.last_seen) <= idle_cutoff);

        let bucket = buckets.entry(user.to_string()).or_insert_with(|| Bucket {
            tokens: self.limit,
            window_start: now,
            last_seen: now,
        });
        if now.saturating_duration_since(bucket.window_start) >= self.window {
            bucket.tokens = self.limit;
            bucket.window_start = now;
        }
        bucket.last_seen = now;

        let allowed = bucket.tokens > 0;
        if allowed {
            bucket.tokens -= 1;
        }
        let elapsed = now.saturating_duration_since(bucket.window_start);
        RateDecision {
            allowed,
            info: RateLimitInfo {
                limit: self.limit,
                remaining: bucket.tokens,
                reset_after: self.window.saturating_sub(elapsed),
            },
        }
    }

    pub fn tracked_users(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
