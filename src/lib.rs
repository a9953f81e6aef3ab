#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # studygate
//!
//! Request admission for AI content generation. Every quiz, flashcard, or
//! tutor request passes four composable policies in a fixed order before a
//! model is ever invoked:
//!
//! 1. **Quota gate** — monthly per-resource allowances from a persisted
//!    subscription (free / premium / enterprise tiers, rolling 30-day reset)
//! 2. **Rate limiter** — process-local fixed window per user
//! 3. **Content cache** — TTL cache keyed by the semantic request tuple;
//!    hits skip generation *and* quota accounting
//! 4. **Retrying generator** — exponential backoff around the backend call,
//!    then validation and sanitization of whatever came back
//!
//! Denials fail closed and carry the structured detail (used, limit,
//! remaining, reset time) a UI needs to render an actionable message.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use studygate::{
//!     AdmissionPipeline, ContentRequest, Difficulty, GenerationError,
//!     InMemorySubscriptionStore, TextGenerator,
//! };
//! use async_trait::async_trait;
//!
//! struct MyBackend;
//!
//! #[async_trait]
//! impl TextGenerator for MyBackend {
//!     async fn generate_text(
//!         &self,
//!         prompt: &str,
//!         temperature: f32,
//!         max_tokens: u32,
//!     ) -> Result<String, GenerationError> {
//!         // call your hosted model here
//!         # let _ = (prompt, temperature, max_tokens);
//!         Ok("[]".to_string())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = AdmissionPipeline::builder(InMemorySubscriptionStore::new(), MyBackend).build();
//! let request = ContentRequest {
//!     subject: "biology".into(),
//!     grade: "9-10".into(),
//!     difficulty: Difficulty::Beginner,
//!     count: 5,
//!     learning_style: None,
//! };
//! let quiz = pipeline.generate_quiz("user-123", &request).await?;
//! println!("{} questions (cached: {})", quiz.items.len(), quiz.cached);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod content;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod pipeline;
pub mod quota;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;

// Re-exports
pub use backoff::Backoff;
pub use cache::{ContentCache, ContentKey, DEFAULT_TTL};
pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{
    parse_flashcards, parse_quiz, sanitize_flashcards, sanitize_quiz,
    validate_flashcard_payload, validate_quiz_payload, ContentError, Flashcard, QuizQuestion,
};
pub use error::AdmissionError;
pub use generation::{ContentRequest, Difficulty, GenerationError, TextGenerator};
pub use metrics::{
    MetricStatus, MetricsRecorder, MetricsStats, RequestMetric, ANONYMOUS_USER,
};
pub use pipeline::{AdmissionPipeline, AdmissionPipelineBuilder, Generated, TutorReply};
pub use quota::{
    InMemorySubscriptionStore, PlanLimits, PlanTier, QuotaService, ResourceKind, StoreError,
    Subscription, SubscriptionStore, UsageStatus, UsageSummary, UNLIMITED,
};
pub use rate_limit::{FixedWindowLimiter, RateDecision, RateLimitConfig, RateLimitStatus};
pub use retry::{RetryError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
