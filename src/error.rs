//! Unified error taxonomy for the admission pipeline.
//!
//! Every rejection carries the structured detail a calling UI needs to
//! render an actionable message: quota rejections include the consumed and
//! total allowance, rate-limit rejections include the window reset time.
//! Dependency failures deny the request; they are never treated as an
//! unlimited allowance.

use crate::content::ContentError;
use crate::generation::GenerationError;
use crate::quota::{PlanTier, ResourceKind, StoreError};
use std::fmt;
use std::sync::Arc;

/// Cap on failures recorded inside `RetryExhausted`, so a misconfigured
/// attempt count cannot balloon the error value.
pub const MAX_RECORDED_FAILURES: usize = 10;

/// Everything that can stop a generation request.
#[derive(Debug, Clone)]
pub enum AdmissionError {
    /// The user has consumed their plan's monthly allowance.
    QuotaExceeded { resource: ResourceKind, used: u32, limit: i64, remaining: i64, plan: PlanTier },
    /// Too many requests inside the current fixed window.
    RateLimited { remaining: u32, reset_at_millis: u64 },
    /// The backend answered, but with a payload that failed validation.
    InvalidContent(Arc<ContentError>),
    /// The subscription backend could not be reached or refused the call.
    Store(StoreError),
    /// A single generation call failed and was not retried.
    Generation(GenerationError),
    /// Every attempt failed; the most recent failures are recorded.
    RetryExhausted { attempts: usize, failures: Arc<Vec<GenerationError>> },
}

impl AdmissionError {
    /// Build a `RetryExhausted`, keeping only the most recent
    /// [`MAX_RECORDED_FAILURES`] failures.
    pub fn retry_exhausted(attempts: usize, mut failures: Vec<GenerationError>) -> Self {
        if failures.len() > MAX_RECORDED_FAILURES {
            failures.drain(..failures.len() - MAX_RECORDED_FAILURES);
        }
        AdmissionError::RetryExhausted { attempts, failures: Arc::new(failures) }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_invalid_content(&self) -> bool {
        matches!(self, Self::InvalidContent(_))
    }

    /// True when a collaborator (store or backend) was unreachable.
    pub fn is_dependency(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// HTTP-equivalent status for callers that speak HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::QuotaExceeded { .. } => 403,
            Self::RateLimited { .. } => 429,
            Self::InvalidContent(_)
            | Self::Store(_)
            | Self::Generation(_)
            | Self::RetryExhausted { .. } => 500,
        }
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded { resource, used, limit, plan, .. } => write!(
                f,
                "{resource} limit reached: {used} of {limit} used on the {plan} plan"
            ),
            Self::RateLimited { remaining, reset_at_millis } => write!(
                f,
                "rate limit exceeded ({remaining} remaining; window resets at {reset_at_millis})"
            ),
            Self::InvalidContent(e) => write!(f, "invalid generation response: {e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Generation(e) => write!(f, "{e}"),
            Self::RetryExhausted { attempts, failures } => match failures.last() {
                Some(last) => {
                    write!(f, "generation failed after {attempts} attempts; last error: {last}")
                }
                None => write!(f, "generation failed after {attempts} attempts"),
            },
        }
    }
}

impl std::error::Error for AdmissionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidContent(e) => Some(e.as_ref()),
            Self::Store(e) => Some(e),
            Self::Generation(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            _ => None,
        }
    }
}

impl From<StoreError> for AdmissionError {
    fn from(e: StoreError) -> Self {
        AdmissionError::Store(e)
    }
}

impl From<ContentError> for AdmissionError {
    fn from(e: ContentError) -> Self {
        AdmissionError::InvalidContent(Arc::new(e))
    }
}

impl From<GenerationError> for AdmissionError {
    fn from(e: GenerationError) -> Self {
        AdmissionError::Generation(e)
    }
}
