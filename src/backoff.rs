//! Backoff schedules for the retrying generator.
//!
//! Attempt semantics: attempt `0` is the initial call and never sleeps;
//! retry `n` (1-based) sleeps `base * factor^(n-1)`. With the defaults
//! (1 s base, factor 2) the schedule is the 1000 ms, 2000 ms, ... the
//! admission pipeline promises. There is no jitter: generation retries are
//! low-volume and per-user, so synchronized wake-ups are not a concern here.
//!
//! Delays saturate at [`MAX_DELAY`] rather than overflowing.

use std::time::Duration;

/// Ceiling applied to every computed delay (1 hour).
pub const MAX_DELAY: Duration = Duration::from_secs(60 * 60);

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry.
    Constant { delay: Duration },
    /// `base * factor^(n-1)` before retry `n`, optionally capped.
    Exponential { base: Duration, factor: u32, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Exponential schedule with the default growth factor of 2.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, factor: 2, max: None }
    }

    /// Override the growth factor. A factor of 1 degenerates to a constant
    /// schedule; 0 is clamped to 1.
    pub fn with_factor(self, factor: u32) -> Self {
        match self {
            Backoff::Exponential { base, max, .. } => {
                Backoff::Exponential { base, factor: factor.max(1), max }
            }
            constant => constant,
        }
    }

    /// Cap every computed delay at `max`.
    pub fn with_max(self, cap: Duration) -> Self {
        match self {
            Backoff::Exponential { base, factor, .. } => {
                Backoff::Exponential { base, factor, max: Some(cap) }
            }
            Backoff::Constant { delay } => Backoff::Constant { delay: delay.min(cap) },
        }
    }

    /// Delay to apply before the given attempt (0-based; 0 = initial call).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self {
            Backoff::Constant { delay } => (*delay).min(MAX_DELAY),
            Backoff::Exponential { base, factor, max } => {
                let exponent = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
                let multiplier = u128::from(*factor).saturating_pow(exponent);
                let millis = base.as_millis().saturating_mul(multiplier);
                let cap = max.map_or(MAX_DELAY, |m| m.min(MAX_DELAY));
                let capped = millis.min(cap.as_millis());
                Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
            }
        }
    }
}

impl Default for Backoff {
    /// The pipeline default: 1 s base doubling per retry.
    fn default() -> Self {
        Backoff::exponential(Duration::from_secs(1))
    }
}
