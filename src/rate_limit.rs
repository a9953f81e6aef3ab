//! Per-user fixed-window rate limiting.
//!
//! A window opens on the first request and lasts `config.window`; up to
//! `config.max_requests` requests are admitted inside it, and the first
//! request at or after the reset instant opens a fresh window. Fixed
//! windows admit a burst straddling the boundary; that is acceptable here
//! because the limiter is a frequency guard behind the quota gate, not the
//! billing mechanism.
//!
//! State is process-local and never persisted. Expired windows are dropped
//! lazily when touched, or in bulk via [`FixedWindowLimiter::purge_expired`].

use crate::clock::{Clock, SystemClock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Limiter configuration. Defaults: 20 requests per hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 20, window: Duration::from_secs(60 * 60) }
    }
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Admitted; `remaining` slots are left in the window.
    Allowed { remaining: u32 },
    /// Refused; the window resets at `reset_at_millis`.
    Denied { reset_at_millis: u64, retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Read-only view of a user's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_at_millis: u64,
}

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at_millis: u64,
}

/// Fixed-window limiter keyed by user id.
#[derive(Debug)]
pub struct FixedWindowLimiter<C = SystemClock> {
    windows: Mutex<HashMap<String, Window>>,
    config: RateLimitConfig,
    clock: C,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    pub fn with_clock(config: RateLimitConfig, clock: C) -> Self {
        Self { windows: Mutex::new(HashMap::new()), config, clock }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Try to consume one request slot for `user_id`.
    pub fn acquire(&self, user_id: &str) -> RateDecision {
        let now = self.clock.now_millis();
        let window_millis = window_millis(self.config.window);
        let mut windows = self.windows.lock().unwrap();

        let window = windows
            .entry(user_id.to_string())
            .or_insert_with(|| Window { count: 0, reset_at_millis: now + window_millis });
        if now >= window.reset_at_millis {
            // The previous window has ended; start a fresh one.
            window.count = 0;
            window.reset_at_millis = now + window_millis;
        }

        if window.count >= self.config.max_requests {
            tracing::debug!(user = user_id, "rate limit exceeded");
            return RateDecision::Denied {
                reset_at_millis: window.reset_at_millis,
                retry_after: Duration::from_millis(window.reset_at_millis.saturating_sub(now)),
            };
        }
        window.count += 1;
        RateDecision::Allowed { remaining: self.config.max_requests - window.count }
    }

    /// Current window state for `user_id` without consuming a slot.
    pub fn status(&self, user_id: &str) -> RateLimitStatus {
        let now = self.clock.now_millis();
        let windows = self.windows.lock().unwrap();

        match windows.get(user_id) {
            Some(window) if now < window.reset_at_millis => RateLimitStatus {
                remaining: self.config.max_requests.saturating_sub(window.count),
                reset_at_millis: window.reset_at_millis,
            },
            _ => RateLimitStatus {
                remaining: self.config.max_requests,
                reset_at_millis: now + window_millis(self.config.window),
            },
        }
    }

    /// Drop every window whose reset instant has passed. Returns how many
    /// were removed. Callers may run this on whatever cadence they like;
    /// nothing is spawned here.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut windows = self.windows.lock().unwrap();
        let before = windows.len();
        windows.retain(|_, window| now < window.reset_at_millis);
        before - windows.len()
    }

    /// Number of tracked windows, live or expired-but-unswept.
    pub fn tracked_users(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}
