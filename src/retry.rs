//! Retry policy for the generation call.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial call + retries).
//! - Attempts run strictly sequentially, never in parallel.
//! - The backoff schedule decides the sleep between attempts; the sleeper
//!   decides how that sleep happens (tests inject `InstantSleeper` or
//!   `TrackingSleeper`).
//! - `should_retry` can veto retrying a particular error, which returns it
//!   immediately.
//! - After the final failed attempt the policy returns `Exhausted` with no
//!   further delay, recording the most recent failures.

use crate::backoff::Backoff;
use crate::error::MAX_RECORDED_FAILURES;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default total attempt count.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Default base delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Terminal outcome of a retried operation.
#[derive(Debug, Clone)]
pub enum RetryError<E> {
    /// Every attempt failed. Holds the most recent failures, last first in
    /// importance: `last_error()` is what the final attempt returned.
    Exhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The `should_retry` predicate declined to retry this error.
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// The error returned by the most recent attempt.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { failures, .. } => failures.last(),
            Self::Aborted(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, failures } => match failures.last() {
                Some(last) => {
                    write!(f, "retries exhausted after {attempts} attempts; last error: {last}")
                }
                None => write!(f, "retries exhausted after {attempts} attempts"),
            },
            Self::Aborted(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error().map(|e| e as &dyn std::error::Error)
    }
}

/// Rejected retry-policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryConfigError {
    #[error("max_attempts must be > 0")]
    ZeroAttempts,
}

/// Retry policy combining an attempt budget, a backoff schedule, a retry
/// predicate, and a sleeper.
#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("sleeper", &self.sleeper)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E>
where
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// The default policy: 3 attempts, 1 s base delay doubling per retry.
    pub fn standard() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, RetryError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut failures: VecDeque<E> = VecDeque::new();

        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !(self.should_retry)(&error) {
                        return Err(RetryError::Aborted(error));
                    }

                    tracing::debug!(attempt = attempt + 1, error = %error, "attempt failed");
                    failures.push_back(error);
                    while failures.len() > MAX_RECORDED_FAILURES {
                        failures.pop_front();
                    }

                    if attempt + 1 >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: self.max_attempts,
                            failures: Arc::new(failures.into_iter().collect()),
                        });
                    }

                    let delay = self.backoff.delay(attempt + 1);
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        // The loop always returns: each iteration either succeeds or, on the
        // final attempt, returns Exhausted.
        unreachable!("retry loop exited without returning")
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> RetryPolicyBuilder<E>
where
    E: fmt::Display + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Total attempts (initial call + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Veto retrying for particular errors.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, RetryConfigError> {
        if self.max_attempts == 0 {
            return Err(RetryConfigError::ZeroAttempts);
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: fmt::Display + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
