//! The admission pipeline: the one place the policies compose.
//!
//! Every generation request passes the same gauntlet, in a fixed order:
//! quota gate, rate limiter, content cache, retrying generator, validation
//! and sanitization, quota increment, metric. A cache hit returns before
//! the generator is touched and does not consume quota; only a fresh
//! generation increments the counter. Denials fail closed: a store error
//! is a denial, never an unlimited allowance.

use crate::cache::{ContentCache, ContentKey, DEFAULT_TTL};
use crate::clock::{Clock, SystemClock};
use crate::content::{
    self, ContentError, Flashcard, QuizQuestion,
};
use crate::error::AdmissionError;
use crate::generation::{
    flashcard_prompt, quiz_prompt, tutor_prompt, ContentRequest, GenerationError, TextGenerator,
    FLASHCARD_MAX_TOKENS, GENERATION_TEMPERATURE, QUIZ_MAX_TOKENS, TUTOR_MAX_TOKENS,
};
use crate::metrics::{MetricsRecorder, MetricsStats, RequestMetric, DEFAULT_CAPACITY};
use crate::quota::{
    QuotaService, ResourceKind, SubscriptionStore, UsageStatus, UsageSummary,
};
use crate::rate_limit::{FixedWindowLimiter, RateLimitConfig, RateLimitStatus};
use crate::retry::{RetryError, RetryPolicy};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// A successfully admitted generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generated<T> {
    pub items: Vec<T>,
    /// Usage after this request (unchanged when served from cache).
    pub usage: UsageStatus,
    /// True when the response came from the content cache.
    pub cached: bool,
}

/// A successfully admitted tutor exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TutorReply {
    pub reply: String,
    pub usage: UsageStatus,
}

/// How one content kind renders its prompt and turns raw backend text into
/// typed, bounded items.
struct GenerationPlan<T> {
    prompt: String,
    max_tokens: u32,
    decode: fn(&Value) -> Result<Vec<T>, ContentError>,
    sanitize: fn(Vec<T>) -> Vec<T>,
}

/// Request admission for AI content generation.
///
/// Construct via [`AdmissionPipeline::builder`]; only the subscription
/// store and the generation backend are required, everything else has the
/// documented defaults.
#[derive(Debug)]
pub struct AdmissionPipeline<S, G, C = SystemClock> {
    quota: QuotaService<S, C>,
    limiter: FixedWindowLimiter<C>,
    cache: ContentCache<C>,
    retry: RetryPolicy<GenerationError>,
    metrics: MetricsRecorder<C>,
    generator: G,
    clock: C,
}

impl<S, G> AdmissionPipeline<S, G>
where
    S: SubscriptionStore,
    G: TextGenerator,
{
    pub fn builder(store: S, generator: G) -> AdmissionPipelineBuilder<S, G> {
        AdmissionPipelineBuilder::new(store, generator)
    }
}

impl<S, G, C> AdmissionPipeline<S, G, C>
where
    S: SubscriptionStore,
    G: TextGenerator,
    C: Clock + Clone,
{
    /// Admit and serve a quiz generation request.
    pub async fn generate_quiz(
        &self,
        user_id: &str,
        request: &ContentRequest,
    ) -> Result<Generated<QuizQuestion>, AdmissionError> {
        let plan = GenerationPlan {
            prompt: quiz_prompt(request),
            max_tokens: QUIZ_MAX_TOKENS,
            decode: content::quiz_from_value,
            sanitize: content::sanitize_quiz,
        };
        self.admit(user_id, ResourceKind::Quiz, request, plan).await
    }

    /// Admit and serve a flashcard generation request.
    pub async fn generate_flashcards(
        &self,
        user_id: &str,
        request: &ContentRequest,
    ) -> Result<Generated<Flashcard>, AdmissionError> {
        let plan = GenerationPlan {
            prompt: flashcard_prompt(request),
            max_tokens: FLASHCARD_MAX_TOKENS,
            decode: content::flashcards_from_value,
            sanitize: content::sanitize_flashcards,
        };
        self.admit(user_id, ResourceKind::Flashcard, request, plan).await
    }

    /// Admit and serve one tutor exchange. Tutor replies are conversational
    /// free text: they are metered and rate limited but never cached.
    pub async fn tutor_reply(
        &self,
        user_id: &str,
        question: &str,
    ) -> Result<TutorReply, AdmissionError> {
        let started = self.clock.now_millis();
        let outcome = self.tutor_inner(user_id, question).await;
        self.finish(user_id, ResourceKind::Tutor, started, None, outcome.as_ref().err());
        outcome
    }

    async fn tutor_inner(
        &self,
        user_id: &str,
        question: &str,
    ) -> Result<TutorReply, AdmissionError> {
        self.gate(user_id, ResourceKind::Tutor).await?;

        let prompt = tutor_prompt(question);
        let reply = self.generate(&prompt, TUTOR_MAX_TOKENS).await?;

        if !self.quota.increment(user_id, ResourceKind::Tutor).await? {
            tracing::warn!(user = user_id, "tutor message not metered; allowance consumed concurrently");
        }
        let usage = self.quota.check(user_id, ResourceKind::Tutor).await?;
        Ok(TutorReply { reply, usage })
    }

    async fn admit<T>(
        &self,
        user_id: &str,
        kind: ResourceKind,
        request: &ContentRequest,
        plan: GenerationPlan<T>,
    ) -> Result<Generated<T>, AdmissionError>
    where
        T: Serialize + Send,
    {
        let started = self.clock.now_millis();
        let outcome = self.admit_inner(user_id, kind, request, plan).await;
        self.finish(user_id, kind, started, Some(request), outcome.as_ref().err());
        outcome
    }

    async fn admit_inner<T>(
        &self,
        user_id: &str,
        kind: ResourceKind,
        request: &ContentRequest,
        plan: GenerationPlan<T>,
    ) -> Result<Generated<T>, AdmissionError>
    where
        T: Serialize + Send,
    {
        let status = self.gate(user_id, kind).await?;

        let key = ContentKey {
            kind,
            subject: request.subject.clone(),
            grade: request.grade.clone(),
            difficulty: request.difficulty,
            count: request.count,
        };
        if let Some(value) = self.cache.get(&key) {
            match (plan.decode)(&value) {
                // Served from cache: no generation call, no quota increment.
                Ok(items) => return Ok(Generated { items, usage: status, cached: true }),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cached payload undecodable; regenerating");
                }
            }
        }

        let text = self.generate(&plan.prompt, plan.max_tokens).await?;
        let value: Value = serde_json::from_str(&text).map_err(ContentError::from)?;
        let items = (plan.sanitize)((plan.decode)(&value)?);

        let payload = serde_json::to_value(&items).map_err(ContentError::from)?;
        self.cache.insert(key, payload);

        if !self.quota.increment(user_id, kind).await? {
            tracing::warn!(user = user_id, %kind, "usage not metered; allowance consumed concurrently");
        }
        let usage = self.quota.check(user_id, kind).await?;
        Ok(Generated { items, usage, cached: false })
    }

    /// Quota gate then rate limiter, in that order. Returns the pre-request
    /// usage status on success.
    async fn gate(&self, user_id: &str, kind: ResourceKind) -> Result<UsageStatus, AdmissionError> {
        let status = self.quota.check(user_id, kind).await?;
        if !status.allowed {
            tracing::info!(user = user_id, %kind, used = status.used, "request denied; quota exhausted");
            return Err(AdmissionError::QuotaExceeded {
                resource: kind,
                used: status.used,
                limit: status.limit,
                remaining: status.remaining,
                plan: status.plan,
            });
        }

        if !self.limiter.acquire(user_id).is_allowed() {
            let window = self.limiter.status(user_id);
            return Err(AdmissionError::RateLimited {
                remaining: window.remaining,
                reset_at_millis: window.reset_at_millis,
            });
        }
        Ok(status)
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, AdmissionError> {
        self.retry
            .execute(|| async move {
                self.generator.generate_text(prompt, GENERATION_TEMPERATURE, max_tokens).await
            })
            .await
            .map_err(AdmissionError::from)
    }

    fn finish(
        &self,
        user_id: &str,
        kind: ResourceKind,
        started_millis: u64,
        request: Option<&ContentRequest>,
        error: Option<&AdmissionError>,
    ) {
        let now = self.clock.now_millis();
        let elapsed = Duration::from_millis(now.saturating_sub(started_millis));
        let mut metric = match error {
            None => RequestMetric::success(user_id, kind, now, elapsed),
            Some(e) => RequestMetric::failure(user_id, kind, now, elapsed, e.to_string()),
        };
        if let Some(request) = request {
            metric = metric.with_request(&request.subject, request.difficulty, request.count);
        }
        self.metrics.record(metric);
    }

    // ---- read-only surface -------------------------------------------------

    /// One resource's allowance for a user.
    pub async fn usage_status(
        &self,
        user_id: &str,
        kind: ResourceKind,
    ) -> Result<UsageStatus, AdmissionError> {
        Ok(self.quota.check(user_id, kind).await?)
    }

    /// All allowances plus the subscription record.
    pub async fn usage_summary(&self, user_id: &str) -> Result<UsageSummary, AdmissionError> {
        Ok(self.quota.summary(user_id).await?)
    }

    /// Consume one unit of quota outside the generation flow.
    pub async fn increment_usage(
        &self,
        user_id: &str,
        kind: ResourceKind,
    ) -> Result<bool, AdmissionError> {
        Ok(self.quota.increment(user_id, kind).await?)
    }

    /// Rate-limit window state without consuming a slot.
    pub fn rate_limit_status(&self, user_id: &str) -> RateLimitStatus {
        self.limiter.status(user_id)
    }

    /// Aggregate request metrics, optionally for one user.
    pub fn metrics_stats(&self, user_id: Option<&str>) -> MetricsStats {
        self.metrics.stats(user_id)
    }

    pub fn cache(&self) -> &ContentCache<C> {
        &self.cache
    }

    pub fn limiter(&self) -> &FixedWindowLimiter<C> {
        &self.limiter
    }

    pub fn metrics(&self) -> &MetricsRecorder<C> {
        &self.metrics
    }
}

impl From<RetryError<GenerationError>> for AdmissionError {
    fn from(e: RetryError<GenerationError>) -> Self {
        match e {
            RetryError::Exhausted { attempts, failures } => {
                AdmissionError::RetryExhausted { attempts, failures }
            }
            RetryError::Aborted(inner) => AdmissionError::Generation(inner),
        }
    }
}

/// Builder for [`AdmissionPipeline`].
pub struct AdmissionPipelineBuilder<S, G, C = SystemClock> {
    store: S,
    generator: G,
    clock: C,
    rate_limit: RateLimitConfig,
    cache_ttl: Duration,
    retry: Option<RetryPolicy<GenerationError>>,
    metrics_capacity: usize,
}

impl<S, G> AdmissionPipelineBuilder<S, G>
where
    S: SubscriptionStore,
    G: TextGenerator,
{
    pub fn new(store: S, generator: G) -> Self {
        Self {
            store,
            generator,
            clock: SystemClock,
            rate_limit: RateLimitConfig::default(),
            cache_ttl: DEFAULT_TTL,
            retry: None,
            metrics_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl<S, G, C> AdmissionPipelineBuilder<S, G, C>
where
    S: SubscriptionStore,
    G: TextGenerator,
    C: Clock + Clone,
{
    /// Swap the wall clock; tests pass a `ManualClock` here.
    pub fn clock<C2: Clock + Clone>(self, clock: C2) -> AdmissionPipelineBuilder<S, G, C2> {
        AdmissionPipelineBuilder {
            store: self.store,
            generator: self.generator,
            clock,
            rate_limit: self.rate_limit,
            cache_ttl: self.cache_ttl,
            retry: self.retry,
            metrics_capacity: self.metrics_capacity,
        }
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy<GenerationError>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn metrics_capacity(mut self, capacity: usize) -> Self {
        self.metrics_capacity = capacity;
        self
    }

    pub fn build(self) -> AdmissionPipeline<S, G, C> {
        AdmissionPipeline {
            quota: QuotaService::with_clock(self.store, self.clock.clone()),
            limiter: FixedWindowLimiter::with_clock(self.rate_limit, self.clock.clone()),
            cache: ContentCache::with_clock(self.cache_ttl, self.clock.clone()),
            retry: self.retry.unwrap_or_else(RetryPolicy::standard),
            metrics: MetricsRecorder::with_clock(self.metrics_capacity, self.clock.clone()),
            generator: self.generator,
            clock: self.clock,
        }
    }
}
