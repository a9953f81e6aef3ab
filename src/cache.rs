//! TTL cache for generated content, keyed by the semantic request tuple.
//!
//! Generation calls are expensive and frequently repeated with identical
//! parameters, so sanitized payloads are kept for a fixed TTL (60 minutes
//! by default). Eviction is lazy: an expired entry is removed by the lookup
//! that finds it, or in bulk via [`ContentCache::purge_expired`]. Inserts
//! are unconditional overwrites; the last writer wins.
//!
//! The cache stores the already-sanitized JSON payload. Lookups re-decode
//! it through the same validators as fresh generations, so a corrupt entry
//! degrades to a cache miss rather than bad output.

use crate::clock::{Clock, SystemClock};
use crate::generation::Difficulty;
use crate::quota::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// The semantic parameters that identify a cacheable generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub kind: ResourceKind,
    pub subject: String,
    pub grade: String,
    pub difficulty: Difficulty,
    pub count: u32,
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.kind, self.subject, self.grade, self.difficulty, self.count
        )
    }
}

#[derive(Debug, Clone)]
struct Entry {
    payload: Value,
    stored_at_millis: u64,
}

/// Process-local TTL cache for generated payloads.
#[derive(Debug)]
pub struct ContentCache<C = SystemClock> {
    entries: Mutex<HashMap<ContentKey, Entry>>,
    ttl: Duration,
    clock: C,
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> ContentCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl, clock }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch a fresh payload, deleting the entry if it has expired.
    pub fn get(&self, key: &ContentKey) -> Option<Value> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(key) {
            if self.is_fresh(entry, now) {
                tracing::debug!(key = %key, "cache hit");
                return Some(entry.payload.clone());
            }
        }
        if entries.remove(key).is_some() {
            tracing::debug!(key = %key, "cache entry expired");
        }
        None
    }

    /// Store a payload, replacing whatever was there.
    pub fn insert(&self, key: ContentKey, payload: Value) {
        let now = self.clock.now_millis();
        tracing::debug!(key = %key, "cache store");
        self.entries
            .lock()
            .unwrap()
            .insert(key, Entry { payload, stored_at_millis: now });
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry, now));
        before - entries.len()
    }

    /// Number of stored entries, fresh or expired-but-unswept.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn is_fresh(&self, entry: &Entry, now: u64) -> bool {
        let ttl_millis = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(entry.stored_at_millis) < ttl_millis
    }
}
