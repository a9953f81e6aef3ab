//! Per-process request metrics.
//!
//! A bounded ring buffer of request outcomes, queryable as aggregate stats
//! over the trailing hour. Nothing here is persisted or shared across
//! instances; the recorder exists so a single process can answer "how are
//! generations doing right now" without external infrastructure.

use crate::clock::{Clock, SystemClock};
use crate::generation::Difficulty;
use crate::quota::ResourceKind;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Bucket used when a failure has no authenticated user attached.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Default ring-buffer capacity.
pub const DEFAULT_CAPACITY: usize = 1_000;

const STATS_WINDOW_MILLIS: u64 = 60 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Success,
    Error,
}

/// One recorded request outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMetric {
    pub user_id: String,
    pub kind: ResourceKind,
    pub timestamp_millis: u64,
    pub duration: Duration,
    pub status: MetricStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl RequestMetric {
    pub fn success(
        user_id: impl Into<String>,
        kind: ResourceKind,
        timestamp_millis: u64,
        duration: Duration,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            timestamp_millis,
            duration,
            status: MetricStatus::Success,
            error: None,
            subject: None,
            difficulty: None,
            count: None,
        }
    }

    pub fn failure(
        user_id: impl Into<String>,
        kind: ResourceKind,
        timestamp_millis: u64,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            timestamp_millis,
            duration,
            status: MetricStatus::Error,
            error: Some(error.into()),
            subject: None,
            difficulty: None,
            count: None,
        }
    }

    /// Attach the semantic request parameters.
    pub fn with_request(mut self, subject: &str, difficulty: Difficulty, count: u32) -> Self {
        self.subject = Some(subject.to_string());
        self.difficulty = Some(difficulty);
        self.count = Some(count);
        self
    }
}

/// Aggregate view over the trailing hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsStats {
    pub total_requests: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Percentage in `[0, 100]`; 0 when there were no requests.
    pub success_rate: f64,
    pub avg_duration_ms: u64,
}

/// Bounded in-memory recorder of request outcomes.
#[derive(Debug)]
pub struct MetricsRecorder<C = SystemClock> {
    entries: Mutex<VecDeque<RequestMetric>>,
    capacity: usize,
    clock: C,
}

impl MetricsRecorder {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, SystemClock)
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<C: Clock> MetricsRecorder<C> {
    pub fn with_clock(capacity: usize, clock: C) -> Self {
        Self { entries: Mutex::new(VecDeque::new()), capacity: capacity.max(1), clock }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a metric, evicting the oldest once the buffer is full.
    pub fn record(&self, metric: RequestMetric) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Every recorded metric for one user, oldest first.
    pub fn for_user(&self, user_id: &str) -> Vec<RequestMetric> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Aggregate stats over the trailing hour, optionally for one user.
    pub fn stats(&self, user_id: Option<&str>) -> MetricsStats {
        let now = self.clock.now_millis();
        let horizon = now.saturating_sub(STATS_WINDOW_MILLIS);
        let entries = self.entries.lock().unwrap();

        let mut total = 0usize;
        let mut successes = 0usize;
        let mut duration_sum = Duration::ZERO;
        for metric in entries.iter() {
            if metric.timestamp_millis <= horizon {
                continue;
            }
            if user_id.is_some_and(|id| id != metric.user_id) {
                continue;
            }
            total += 1;
            if metric.status == MetricStatus::Success {
                successes += 1;
            }
            duration_sum += metric.duration;
        }

        let success_rate =
            if total > 0 { successes as f64 / total as f64 * 100.0 } else { 0.0 };
        let avg_duration_ms = if total > 0 {
            let avg = duration_sum.as_millis() as f64 / total as f64;
            avg.round() as u64
        } else {
            0
        };

        MetricsStats {
            total_requests: total,
            success_count: successes,
            error_count: total - successes,
            success_rate,
            avg_duration_ms,
        }
    }
}
