//! Accounting invariants observed through the public surface.

mod common;

use async_trait::async_trait;
use common::{quiz_json, quiz_request, ScriptedGenerator};
use std::sync::Arc;
use std::time::Duration;
use studygate::{
    AdmissionError, AdmissionPipeline, InMemorySubscriptionStore, InstantSleeper, ManualClock,
    PlanTier, ResourceKind, RetryPolicy, StoreError, Subscription, SubscriptionStore,
};

const NOW: u64 = 1_700_000_000_000;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn pipeline_with_clock(
    store: Arc<InMemorySubscriptionStore>,
    generator: ScriptedGenerator,
    clock: ManualClock,
) -> AdmissionPipeline<Arc<InMemorySubscriptionStore>, ScriptedGenerator, ManualClock> {
    let retry = RetryPolicy::builder()
        .sleeper(InstantSleeper)
        .build()
        .expect("valid retry config");
    AdmissionPipeline::builder(store, generator)
        .clock(clock)
        .retry(retry)
        .build()
}

#[tokio::test]
async fn a_spent_allowance_comes_back_after_the_monthly_rollover() {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let generator = ScriptedGenerator::new();
    let clock = ManualClock::new(NOW);
    let pipeline = pipeline_with_clock(Arc::clone(&store), generator.clone(), clock.clone());

    // Burn the whole free-plan quiz allowance on distinct subjects.
    for i in 0..5 {
        generator.push_ok(quiz_json(1));
        pipeline
            .generate_quiz("ada", &quiz_request(&format!("subject-{i}")))
            .await
            .unwrap();
    }
    let err = pipeline.generate_quiz("ada", &quiz_request("one-more")).await.unwrap_err();
    assert!(err.is_quota_exceeded());

    // Thirty days later the counters roll over and requests flow again.
    clock.advance(31 * DAY);
    generator.push_ok(quiz_json(1));
    let generated = pipeline.generate_quiz("ada", &quiz_request("fresh")).await.unwrap();
    assert_eq!(generated.usage.used, 1);
    assert_eq!(store.get("ada").unwrap().quizzes_used, 1);

    let summary = pipeline.usage_summary("ada").await.unwrap();
    assert_eq!(summary.days_until_reset, 30);
}

#[tokio::test]
async fn premium_limits_apply_end_to_end() {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let generator = ScriptedGenerator::new();
    let clock = ManualClock::new(NOW);
    let pipeline = pipeline_with_clock(Arc::clone(&store), generator.clone(), clock.clone());

    let mut subscription =
        Subscription::new("grace", PlanTier::Premium, NOW + 10 * DAY.as_millis() as u64);
    subscription.quizzes_used = 99;
    store.put(subscription);

    generator.push_ok(quiz_json(1));
    let generated = pipeline.generate_quiz("grace", &quiz_request("math")).await.unwrap();
    assert_eq!(generated.usage.used, 100);
    assert_eq!(generated.usage.remaining, 0);
    assert_eq!(generated.usage.percent_used, 100);

    let err = pipeline.generate_quiz("grace", &quiz_request("other")).await.unwrap_err();
    assert!(err.is_quota_exceeded());
}

#[tokio::test]
async fn enterprise_plans_are_never_gated_by_quota() {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let generator = ScriptedGenerator::new();
    let pipeline =
        pipeline_with_clock(Arc::clone(&store), generator.clone(), ManualClock::new(NOW));

    let mut subscription =
        Subscription::new("corp", PlanTier::Enterprise, NOW + 10 * DAY.as_millis() as u64);
    subscription.quizzes_used = 5_000;
    store.put(subscription);

    generator.push_ok(quiz_json(1));
    let generated = pipeline.generate_quiz("corp", &quiz_request("math")).await.unwrap();
    assert!(generated.usage.is_unlimited);
    assert_eq!(generated.usage.remaining, -1);
    assert_eq!(store.get("corp").unwrap().quizzes_used, 5_001);
}

#[tokio::test]
async fn direct_increment_refuses_to_pass_the_ceiling() {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let generator = ScriptedGenerator::new();
    let clock = ManualClock::new(NOW);
    let pipeline = pipeline_with_clock(Arc::clone(&store), generator, clock);

    let mut subscription =
        Subscription::new("ada", PlanTier::Free, NOW + 10 * DAY.as_millis() as u64);
    subscription.flashcards_used = 5;
    store.put(subscription);

    assert!(!pipeline.increment_usage("ada", ResourceKind::Flashcard).await.unwrap());
    assert_eq!(store.get("ada").unwrap().flashcards_used, 5);
}

/// Store whose every call fails, as if the backing service were down.
#[derive(Debug)]
struct UnreachableStore;

#[async_trait]
impl SubscriptionStore for UnreachableStore {
    async fn fetch(&self, _: &str) -> Result<Option<Subscription>, StoreError> {
        Err(StoreError::Unavailable("dns failure".into()))
    }

    async fn insert(&self, _: Subscription) -> Result<Subscription, StoreError> {
        Err(StoreError::Unavailable("dns failure".into()))
    }

    async fn update(&self, _: &Subscription) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("dns failure".into()))
    }

    async fn increment(&self, _: &str, _: ResourceKind) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("dns failure".into()))
    }
}

#[tokio::test]
async fn an_unreachable_store_denies_instead_of_allowing() {
    let generator = ScriptedGenerator::new();
    let retry = RetryPolicy::builder()
        .sleeper(InstantSleeper)
        .build()
        .expect("valid retry config");
    let pipeline = AdmissionPipeline::builder(UnreachableStore, generator.clone())
        .clock(ManualClock::new(NOW))
        .retry(retry)
        .build();

    let err = pipeline.generate_quiz("ada", &quiz_request("math")).await.unwrap_err();
    assert!(matches!(&err, AdmissionError::Store(StoreError::Unavailable(_))));
    assert!(err.is_dependency());
    assert_eq!(err.status_code(), 500);
    // The generator was never consulted.
    assert_eq!(generator.calls(), 0);
}
