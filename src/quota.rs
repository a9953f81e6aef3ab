//! Usage accounting against a persisted per-user subscription.
//!
//! Plans carry a monthly allowance per resource; counters roll over 30 days
//! after the last reset. The persistence backend sits behind
//! [`SubscriptionStore`] so the service itself stays storage-agnostic, and
//! every increment for a user is funneled through a per-user async mutex so
//! a single process cannot double-spend quota with concurrent requests.
//!
//! Failure policy: if the store is unreachable the error propagates and the
//! caller denies the request. Quota is never assumed unlimited on error.

use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sentinel limit meaning "no ceiling".
pub const UNLIMITED: i64 = -1;

/// How long a usage period lasts before counters roll over.
pub const USAGE_RESET_PERIOD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1_000;

/// Subscription tier. Limits are static configuration, not stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Premium,
    Enterprise,
}

impl PlanTier {
    /// Monthly allowances for this tier.
    pub fn limits(self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits { quizzes: 5, flashcards: 5, tutor_messages: 20 },
            PlanTier::Premium => {
                PlanLimits { quizzes: 100, flashcards: 100, tutor_messages: 500 }
            }
            PlanTier::Enterprise => PlanLimits {
                quizzes: UNLIMITED,
                flashcards: UNLIMITED,
                tutor_messages: UNLIMITED,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Premium => "premium",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-resource monthly allowances; `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub quizzes: i64,
    pub flashcards: i64,
    pub tutor_messages: i64,
}

impl PlanLimits {
    pub fn for_resource(self, resource: ResourceKind) -> i64 {
        match resource {
            ResourceKind::Quiz => self.quizzes,
            ResourceKind::Flashcard => self.flashcards,
            ResourceKind::Tutor => self.tutor_messages,
        }
    }
}

/// The metered request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Quiz,
    Flashcard,
    Tutor,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Quiz => "quiz",
            ResourceKind::Flashcard => "flashcard",
            ResourceKind::Tutor => "tutor",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-user subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: String,
    pub plan: PlanTier,
    pub quiz_limit: i64,
    pub flashcard_limit: i64,
    pub tutor_messages_limit: i64,
    pub quizzes_used: u32,
    pub flashcards_used: u32,
    pub tutor_messages_used: u32,
    /// Epoch millis at which counters next roll over.
    pub usage_reset_date: u64,
}

impl Subscription {
    /// Fresh record for a plan, counters at zero.
    pub fn new(user_id: impl Into<String>, plan: PlanTier, usage_reset_date: u64) -> Self {
        let limits = plan.limits();
        Self {
            user_id: user_id.into(),
            plan,
            quiz_limit: limits.quizzes,
            flashcard_limit: limits.flashcards,
            tutor_messages_limit: limits.tutor_messages,
            quizzes_used: 0,
            flashcards_used: 0,
            tutor_messages_used: 0,
            usage_reset_date,
        }
    }

    pub fn limit_for(&self, resource: ResourceKind) -> i64 {
        match resource {
            ResourceKind::Quiz => self.quiz_limit,
            ResourceKind::Flashcard => self.flashcard_limit,
            ResourceKind::Tutor => self.tutor_messages_limit,
        }
    }

    pub fn used_for(&self, resource: ResourceKind) -> u32 {
        match resource {
            ResourceKind::Quiz => self.quizzes_used,
            ResourceKind::Flashcard => self.flashcards_used,
            ResourceKind::Tutor => self.tutor_messages_used,
        }
    }

    pub(crate) fn bump(&mut self, resource: ResourceKind) {
        let counter = match resource {
            ResourceKind::Quiz => &mut self.quizzes_used,
            ResourceKind::Flashcard => &mut self.flashcards_used,
            ResourceKind::Tutor => &mut self.tutor_messages_used,
        };
        *counter = counter.saturating_add(1);
    }

    pub(crate) fn reset_usage(&mut self, next_reset: u64) {
        self.quizzes_used = 0;
        self.flashcards_used = 0;
        self.tutor_messages_used = 0;
        self.usage_reset_date = next_reset;
    }
}

/// Errors from the subscription backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("subscription backend unavailable: {0}")]
    Unavailable(String),
    #[error("subscription backend rejected the request: {0}")]
    Rejected(String),
}

/// Persistence port for subscription records.
///
/// `increment` returns `Ok(false)` when the backend offers no atomic
/// increment primitive; the caller then falls back to read-modify-write.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<Subscription>, StoreError>;

    async fn insert(&self, subscription: Subscription) -> Result<Subscription, StoreError>;

    async fn update(&self, subscription: &Subscription) -> Result<(), StoreError>;

    async fn increment(&self, user_id: &str, resource: ResourceKind) -> Result<bool, StoreError>;
}

#[async_trait]
impl<T: SubscriptionStore + ?Sized> SubscriptionStore for Arc<T> {
    async fn fetch(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        (**self).fetch(user_id).await
    }

    async fn insert(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
        (**self).insert(subscription).await
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), StoreError> {
        (**self).update(subscription).await
    }

    async fn increment(&self, user_id: &str, resource: ResourceKind) -> Result<bool, StoreError> {
        (**self).increment(user_id, resource).await
    }
}

/// Mutex-guarded map store with a native atomic increment. Used by tests and
/// single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionStore {
    records: Arc<Mutex<HashMap<String, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a record, bypassing the service layer. Test convenience.
    pub fn get(&self, user_id: &str) -> Option<Subscription> {
        self.records.lock().unwrap().get(user_id).cloned()
    }

    /// Seed a record directly, bypassing the service layer. Test convenience.
    pub fn put(&self, subscription: Subscription) {
        self.records.lock().unwrap().insert(subscription.user_id.clone(), subscription);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
        Ok(self.records.lock().unwrap().get(user_id).cloned())
    }

    async fn insert(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
        let mut records = self.records.lock().unwrap();
        records.insert(subscription.user_id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn update(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        records.insert(subscription.user_id.clone(), subscription.clone());
        Ok(())
    }

    async fn increment(&self, user_id: &str, resource: ResourceKind) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(user_id) {
            Some(record) => {
                record.bump(resource);
                Ok(true)
            }
            None => Err(StoreError::Rejected(format!("no subscription for {user_id}"))),
        }
    }
}

/// Point-in-time view of one resource's allowance for a user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageStatus {
    pub allowed: bool,
    pub used: u32,
    pub limit: i64,
    /// `-1` when unlimited, else `max(0, limit - used)`.
    pub remaining: i64,
    pub plan: PlanTier,
    pub is_unlimited: bool,
    /// Rounded percentage of the allowance consumed, clamped to 100.
    pub percent_used: u8,
    pub upgrade_required: bool,
}

impl UsageStatus {
    pub(crate) fn evaluate(subscription: &Subscription, resource: ResourceKind) -> Self {
        let used = subscription.used_for(resource);
        let limit = subscription.limit_for(resource);
        let is_unlimited = limit == UNLIMITED;
        let allowed = is_unlimited || i64::from(used) < limit;
        let remaining = if is_unlimited { UNLIMITED } else { (limit - i64::from(used)).max(0) };
        let percent_used = if is_unlimited {
            0
        } else if limit <= 0 {
            100
        } else {
            let percent = (f64::from(used) / limit as f64 * 100.0).round();
            percent.min(100.0) as u8
        };
        Self {
            allowed,
            used,
            limit,
            remaining,
            plan: subscription.plan,
            is_unlimited,
            percent_used,
            upgrade_required: !allowed,
        }
    }
}

/// All three resource statuses plus the record they came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub quiz: UsageStatus,
    pub flashcard: UsageStatus,
    pub tutor: UsageStatus,
    pub subscription: Subscription,
    pub days_until_reset: u32,
}

/// Usage accounting over a [`SubscriptionStore`].
#[derive(Debug)]
pub struct QuotaService<S, C = SystemClock> {
    store: S,
    clock: C,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: SubscriptionStore> QuotaService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S, C> QuotaService<S, C>
where
    S: SubscriptionStore,
    C: Clock,
{
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock, user_locks: Mutex::new(HashMap::new()) }
    }

    /// Fetch a user's subscription, lazily creating a free-plan record and
    /// rolling counters over once the reset date has passed.
    pub async fn subscription(&self, user_id: &str) -> Result<Subscription, StoreError> {
        let now = self.clock.now_millis();
        let next_reset = now + millis(USAGE_RESET_PERIOD);

        let Some(mut subscription) = self.store.fetch(user_id).await? else {
            tracing::info!(user = user_id, "creating free-plan subscription");
            let created = Subscription::new(user_id, PlanTier::Free, next_reset);
            return self.store.insert(created).await;
        };

        if now >= subscription.usage_reset_date {
            tracing::info!(user = user_id, "usage period elapsed; resetting counters");
            subscription.reset_usage(next_reset);
            self.store.update(&subscription).await?;
        }
        Ok(subscription)
    }

    /// Evaluate one resource's allowance without mutating anything.
    pub async fn check(
        &self,
        user_id: &str,
        resource: ResourceKind,
    ) -> Result<UsageStatus, StoreError> {
        let subscription = self.subscription(user_id).await?;
        Ok(UsageStatus::evaluate(&subscription, resource))
    }

    /// Consume one unit of the resource, if any allowance remains.
    ///
    /// Returns `Ok(false)` without mutation when the user is at their limit.
    /// Same-user calls are serialized so a burst of concurrent requests
    /// cannot push a counter past its ceiling through this service.
    pub async fn increment(
        &self,
        user_id: &str,
        resource: ResourceKind,
    ) -> Result<bool, StoreError> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let status = self.check(user_id, resource).await?;
        if !status.allowed {
            tracing::debug!(user = user_id, %resource, "increment refused; limit reached");
            return Ok(false);
        }

        if self.store.increment(user_id, resource).await? {
            return Ok(true);
        }

        // Backend has no atomic increment; read-modify-write instead.
        let mut subscription = self.subscription(user_id).await?;
        subscription.bump(resource);
        self.store.update(&subscription).await?;
        Ok(true)
    }

    /// Statuses for all three resources from a single fetch.
    pub async fn summary(&self, user_id: &str) -> Result<UsageSummary, StoreError> {
        let subscription = self.subscription(user_id).await?;
        let now = self.clock.now_millis();
        let until_reset = subscription.usage_reset_date.saturating_sub(now);
        let full_days = until_reset / DAY_MILLIS + u64::from(until_reset % DAY_MILLIS != 0);
        let days_until_reset = u32::try_from(full_days).unwrap_or(u32::MAX);
        Ok(UsageSummary {
            quiz: UsageStatus::evaluate(&subscription, ResourceKind::Quiz),
            flashcard: UsageStatus::evaluate(&subscription, ResourceKind::Flashcard),
            tutor: UsageStatus::evaluate(&subscription, ResourceKind::Tutor),
            subscription,
            days_until_reset,
        })
    }

    fn lock_for(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap();
        locks.entry(user_id.to_string()).or_default().clone()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: u64 = 1_700_000_000_000;

    fn service() -> (QuotaService<InMemorySubscriptionStore, ManualClock>, InMemorySubscriptionStore, ManualClock)
    {
        let store = InMemorySubscriptionStore::new();
        let clock = ManualClock::new(NOW);
        let service = QuotaService::with_clock(store.clone(), clock.clone());
        (service, store, clock)
    }

    #[tokio::test]
    async fn first_touch_creates_free_plan_record() {
        let (service, store, _) = service();

        let subscription = service.subscription("ada").await.unwrap();
        assert_eq!(subscription.plan, PlanTier::Free);
        assert_eq!(subscription.quiz_limit, 5);
        assert_eq!(subscription.tutor_messages_limit, 20);
        assert_eq!(subscription.quizzes_used, 0);
        assert_eq!(subscription.usage_reset_date, NOW + millis(USAGE_RESET_PERIOD));
        assert!(store.get("ada").is_some());
    }

    #[tokio::test]
    async fn counters_roll_over_when_reset_date_passes() {
        let (service, store, clock) = service();
        let mut seeded = Subscription::new("ada", PlanTier::Free, NOW + 1_000);
        seeded.quizzes_used = 4;
        seeded.flashcards_used = 2;
        seeded.tutor_messages_used = 19;
        store.put(seeded);

        // Before the reset date: untouched.
        let before = service.subscription("ada").await.unwrap();
        assert_eq!(before.quizzes_used, 4);

        clock.advance(Duration::from_secs(2));
        let after = service.subscription("ada").await.unwrap();
        assert_eq!(after.quizzes_used, 0);
        assert_eq!(after.flashcards_used, 0);
        assert_eq!(after.tutor_messages_used, 0);
        assert_eq!(after.usage_reset_date, clock.now_millis() + millis(USAGE_RESET_PERIOD));
        // Persisted, not just returned.
        assert_eq!(store.get("ada").unwrap().quizzes_used, 0);
    }

    #[test]
    fn plan_limits_expose_per_resource_values() {
        let limits = PlanTier::Premium.limits();
        assert_eq!(limits.for_resource(ResourceKind::Quiz), 100);
        assert_eq!(limits.for_resource(ResourceKind::Flashcard), 100);
        assert_eq!(limits.for_resource(ResourceKind::Tutor), 500);
        assert_eq!(PlanTier::Enterprise.limits().for_resource(ResourceKind::Quiz), UNLIMITED);
    }

    #[tokio::test]
    async fn check_reports_the_spec_arithmetic() {
        let (service, store, _) = service();
        let mut seeded = Subscription::new("ada", PlanTier::Free, NOW + 1_000_000);
        seeded.quizzes_used = 3;
        store.put(seeded);

        let status = service.check("ada", ResourceKind::Quiz).await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.used, 3);
        assert_eq!(status.limit, 5);
        assert_eq!(status.remaining, 2);
        assert_eq!(status.percent_used, 60);
        assert!(!status.is_unlimited);
        assert!(!status.upgrade_required);
    }

    #[tokio::test]
    async fn exhausted_allowance_denies_and_flags_upgrade() {
        let (service, store, _) = service();
        let mut seeded = Subscription::new("ada", PlanTier::Free, NOW + 1_000_000);
        seeded.quizzes_used = 5;
        store.put(seeded);

        let status = service.check("ada", ResourceKind::Quiz).await.unwrap();
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.percent_used, 100);
        assert!(status.upgrade_required);
    }

    #[tokio::test]
    async fn unlimited_plan_is_always_allowed() {
        let (service, store, _) = service();
        let mut seeded = Subscription::new("corp", PlanTier::Enterprise, NOW + 1_000_000);
        seeded.quizzes_used = 10_000;
        store.put(seeded);

        let status = service.check("corp", ResourceKind::Quiz).await.unwrap();
        assert!(status.allowed);
        assert!(status.is_unlimited);
        assert_eq!(status.limit, UNLIMITED);
        assert_eq!(status.remaining, UNLIMITED);
        assert_eq!(status.percent_used, 0);
    }

    #[tokio::test]
    async fn percent_used_is_clamped_to_100() {
        let (service, store, _) = service();
        let mut seeded = Subscription::new("ada", PlanTier::Free, NOW + 1_000_000);
        seeded.quizzes_used = 12; // over-limit record, e.g. after a downgrade
        store.put(seeded);

        let status = service.check("ada", ResourceKind::Quiz).await.unwrap();
        assert_eq!(status.percent_used, 100);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn increment_consumes_exactly_one_unit() {
        let (service, store, _) = service();

        assert!(service.increment("ada", ResourceKind::Flashcard).await.unwrap());
        assert_eq!(store.get("ada").unwrap().flashcards_used, 1);
        assert_eq!(store.get("ada").unwrap().quizzes_used, 0);
    }

    #[tokio::test]
    async fn increment_at_limit_returns_false_and_mutates_nothing() {
        let (service, store, _) = service();
        let mut seeded = Subscription::new("ada", PlanTier::Free, NOW + 1_000_000);
        seeded.quizzes_used = 5;
        store.put(seeded.clone());

        assert!(!service.increment("ada", ResourceKind::Quiz).await.unwrap());
        assert_eq!(store.get("ada").unwrap(), seeded);
    }

    /// Store without an atomic increment primitive; exercises the
    /// read-modify-write fallback.
    #[derive(Debug, Clone, Default)]
    struct PlainStore {
        inner: InMemorySubscriptionStore,
    }

    #[async_trait]
    impl SubscriptionStore for PlainStore {
        async fn fetch(&self, user_id: &str) -> Result<Option<Subscription>, StoreError> {
            self.inner.fetch(user_id).await
        }

        async fn insert(&self, subscription: Subscription) -> Result<Subscription, StoreError> {
            self.inner.insert(subscription).await
        }

        async fn update(&self, subscription: &Subscription) -> Result<(), StoreError> {
            self.inner.update(subscription).await
        }

        async fn increment(&self, _: &str, _: ResourceKind) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn increment_falls_back_to_read_modify_write() {
        let store = PlainStore::default();
        let service = QuotaService::with_clock(store.clone(), ManualClock::new(NOW));

        assert!(service.increment("ada", ResourceKind::Tutor).await.unwrap());
        assert_eq!(store.inner.get("ada").unwrap().tutor_messages_used, 1);
    }

    #[tokio::test]
    async fn concurrent_increments_never_pass_the_ceiling() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let mut seeded = Subscription::new("ada", PlanTier::Free, NOW + 1_000_000);
        seeded.quizzes_used = 3; // two units left
        store.put(seeded);
        let service =
            Arc::new(QuotaService::with_clock(store.clone(), ManualClock::new(NOW)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.increment("ada", ResourceKind::Quiz).await.unwrap()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 2);
        assert_eq!(store.get("ada").unwrap().quizzes_used, 5);
    }

    #[tokio::test]
    async fn summary_reports_days_until_reset() {
        let (service, store, _) = service();
        store.put(Subscription::new("ada", PlanTier::Premium, NOW + 5 * DAY_MILLIS + 1));

        let summary = service.summary("ada").await.unwrap();
        assert_eq!(summary.days_until_reset, 6); // partial days round up
        assert_eq!(summary.quiz.limit, 100);
        assert_eq!(summary.tutor.limit, 500);
        assert_eq!(summary.subscription.plan, PlanTier::Premium);
    }

    /// Store that refuses every call; exercises the fail-closed contract.
    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl SubscriptionStore for DownStore {
        async fn fetch(&self, _: &str) -> Result<Option<Subscription>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn insert(&self, _: Subscription) -> Result<Subscription, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn update(&self, _: &Subscription) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn increment(&self, _: &str, _: ResourceKind) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_store_surfaces_an_error_not_an_allowance() {
        let service = QuotaService::with_clock(DownStore, ManualClock::new(NOW));
        assert!(service.check("ada", ResourceKind::Quiz).await.is_err());
        assert!(service.increment("ada", ResourceKind::Quiz).await.is_err());
    }
}
