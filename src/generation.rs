//! Port to the external text-generation backend, plus the request types the
//! pipeline renders prompts from.
//!
//! The backend contract is deliberately narrow: one prompt in, one string
//! out. Model choice, transport, and authentication live in the adapter
//! behind [`TextGenerator`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sampling temperature used for every generation call.
pub(crate) const GENERATION_TEMPERATURE: f32 = 0.7;
/// Token budget for quiz generation.
pub(crate) const QUIZ_MAX_TOKENS: u32 = 4_000;
/// Token budget for flashcard generation.
pub(crate) const FLASHCARD_MAX_TOKENS: u32 = 3_000;
/// Token budget for a tutor reply.
pub(crate) const TUTOR_MAX_TOKENS: u32 = 2_000;

/// Failures from the generation backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("generation response missing expected content: {0}")]
    Malformed(String),
    #[error("generation backend unreachable: {0}")]
    Unreachable(String),
}

/// The external generative-text service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerationError>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate_text(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        (**self).generate_text(prompt, temperature, max_tokens).await
    }
}

/// Requested difficulty band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic parameters of a quiz or flashcard request. These five fields
/// (with the resource kind) also form the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRequest {
    pub subject: String,
    pub grade: String,
    pub difficulty: Difficulty,
    pub count: u32,
    pub learning_style: Option<String>,
}

fn style_line(request: &ContentRequest) -> String {
    match &request.learning_style {
        Some(style) => format!("Learning style preference: {style}.\n"),
        None => String::new(),
    }
}

pub(crate) fn quiz_prompt(request: &ContentRequest) -> String {
    format!(
        "Generate exactly {count} multiple-choice questions for {subject} at {grade} level.\n\
         Difficulty: {difficulty}.\n\
         {style}\
         Return a JSON array where every element has the shape \
         {{\"id\": number, \"question\": string, \"options\": [string], \
         \"correctAnswer\": string, \"explanation\": string}}. \
         Start with [ and end with ]. No markdown or code fences.",
        count = request.count,
        subject = request.subject,
        grade = request.grade,
        difficulty = request.difficulty,
        style = style_line(request),
    )
}

pub(crate) fn flashcard_prompt(request: &ContentRequest) -> String {
    format!(
        "Generate exactly {count} flashcard pairs for {subject} at {grade} level.\n\
         Difficulty: {difficulty}.\n\
         {style}\
         Return a JSON array where every element has the shape \
         {{\"id\": number, \"front\": string, \"back\": string}}. \
         Start with [ and end with ]. No markdown or code fences.",
        count = request.count,
        subject = request.subject,
        grade = request.grade,
        difficulty = request.difficulty,
        style = style_line(request),
    )
}

pub(crate) fn tutor_prompt(question: &str) -> String {
    format!("You are a patient tutor. Answer the student's question clearly.\n\n{question}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ContentRequest {
        ContentRequest {
            subject: "chemistry".into(),
            grade: "9-10".into(),
            difficulty: Difficulty::Intermediate,
            count: 5,
            learning_style: None,
        }
    }

    #[test]
    fn quiz_prompt_carries_the_request_parameters() {
        let prompt = quiz_prompt(&request());
        assert!(prompt.contains("exactly 5 multiple-choice questions"));
        assert!(prompt.contains("chemistry"));
        assert!(prompt.contains("9-10"));
        assert!(prompt.contains("intermediate"));
        assert!(prompt.contains("correctAnswer"));
        assert!(!prompt.contains("Learning style"));
    }

    #[test]
    fn learning_style_is_included_when_present() {
        let mut req = request();
        req.learning_style = Some("visual".into());
        assert!(flashcard_prompt(&req).contains("Learning style preference: visual"));
    }

    #[test]
    fn difficulty_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Difficulty::Advanced).unwrap(), "\"advanced\"");
        let parsed: Difficulty = serde_json::from_str("\"beginner\"").unwrap();
        assert_eq!(parsed, Difficulty::Beginner);
    }
}
