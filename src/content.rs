//! Generated-content payloads: structural validation and sanitization.
//!
//! The generation backend is asked for a bare JSON array. Everything it
//! returns is untrusted: [`parse_quiz`] / [`parse_flashcards`] reject any
//! structural mismatch, and the sanitizers bound every free-text field
//! before the payload is cached or returned. Truncation is a hard cut by
//! character count; it never splits a code point.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest question text kept after sanitization.
pub const MAX_QUESTION_CHARS: usize = 1_000;
/// Longest answer-option text kept after sanitization.
pub const MAX_OPTION_CHARS: usize = 500;
/// Longest correct-answer marker kept after sanitization.
pub const MAX_ANSWER_CHARS: usize = 10;
/// Longest explanation text kept after sanitization.
pub const MAX_EXPLANATION_CHARS: usize = 500;
/// Longest flashcard front kept after sanitization.
pub const MAX_FRONT_CHARS: usize = 500;
/// Longest flashcard back kept after sanitization.
pub const MAX_BACK_CHARS: usize = 1_000;

/// One multiple-choice question as emitted by the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: u32,
    pub question: String,
    pub options: Vec<String>,
    #[serde(rename = "correctAnswer")]
    pub correct_answer: String,
    pub explanation: String,
}

/// One flashcard pair as emitted by the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: u32,
    pub front: String,
    pub back: String,
}

/// Why a generation payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("generation output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("generation output does not match the expected {expected} shape")]
    InvalidShape { expected: &'static str },
}

fn is_string_array(value: &Value) -> bool {
    value.as_array().is_some_and(|items| items.iter().all(Value::is_string))
}

/// Structural type guard for a quiz payload. Any mismatch is `false`.
pub fn validate_quiz_payload(value: &Value) -> bool {
    let Some(items) = value.as_array() else {
        return false;
    };
    items.iter().all(|item| {
        item.get("id").is_some_and(Value::is_u64)
            && item.get("question").is_some_and(Value::is_string)
            && item.get("options").is_some_and(is_string_array)
            && item.get("correctAnswer").is_some_and(Value::is_string)
            && item.get("explanation").is_some_and(Value::is_string)
    })
}

/// Structural type guard for a flashcard payload. Any mismatch is `false`.
pub fn validate_flashcard_payload(value: &Value) -> bool {
    let Some(items) = value.as_array() else {
        return false;
    };
    items.iter().all(|item| {
        item.get("id").is_some_and(Value::is_u64)
            && item.get("front").is_some_and(Value::is_string)
            && item.get("back").is_some_and(Value::is_string)
    })
}

/// Decode an already-parsed quiz payload, re-checking its shape.
pub fn quiz_from_value(value: &Value) -> Result<Vec<QuizQuestion>, ContentError> {
    if !validate_quiz_payload(value) {
        return Err(ContentError::InvalidShape { expected: "quiz" });
    }
    Ok(serde_json::from_value(value.clone())?)
}

/// Decode an already-parsed flashcard payload, re-checking its shape.
pub fn flashcards_from_value(value: &Value) -> Result<Vec<Flashcard>, ContentError> {
    if !validate_flashcard_payload(value) {
        return Err(ContentError::InvalidShape { expected: "flashcard" });
    }
    Ok(serde_json::from_value(value.clone())?)
}

/// Parse raw generation text into quiz questions.
pub fn parse_quiz(text: &str) -> Result<Vec<QuizQuestion>, ContentError> {
    let value: Value = serde_json::from_str(text)?;
    quiz_from_value(&value)
}

/// Parse raw generation text into flashcards.
pub fn parse_flashcards(text: &str) -> Result<Vec<Flashcard>, ContentError> {
    let value: Value = serde_json::from_str(text)?;
    flashcards_from_value(&value)
}

fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((byte_index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(byte_index);
    }
}

/// Bound every free-text field of a quiz to its maximum length.
pub fn sanitize_quiz(mut questions: Vec<QuizQuestion>) -> Vec<QuizQuestion> {
    for question in &mut questions {
        truncate_chars(&mut question.question, MAX_QUESTION_CHARS);
        for option in &mut question.options {
            truncate_chars(option, MAX_OPTION_CHARS);
        }
        truncate_chars(&mut question.correct_answer, MAX_ANSWER_CHARS);
        truncate_chars(&mut question.explanation, MAX_EXPLANATION_CHARS);
    }
    questions
}

/// Bound every free-text field of a flashcard set to its maximum length.
pub fn sanitize_flashcards(mut cards: Vec<Flashcard>) -> Vec<Flashcard> {
    for card in &mut cards {
        truncate_chars(&mut card.front, MAX_FRONT_CHARS);
        truncate_chars(&mut card.back, MAX_BACK_CHARS);
    }
    cards
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_formed_quiz_passes_and_decodes() {
        let text = r#"[{"id":1,"question":"2+2?","options":["A) 3","B) 4"],"correctAnswer":"B","explanation":"arithmetic"}]"#;
        let questions = parse_quiz(text).expect("valid quiz");
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_answer, "B");
    }

    #[test]
    fn quiz_missing_field_is_rejected() {
        let value = json!([{"id":1,"question":"q","options":["a"],"correctAnswer":"A"}]);
        assert!(!validate_quiz_payload(&value));
        assert!(matches!(
            quiz_from_value(&value),
            Err(ContentError::InvalidShape { expected: "quiz" })
        ));
    }

    #[test]
    fn quiz_with_non_string_option_is_rejected() {
        let value = json!([{
            "id": 1,
            "question": "q",
            "options": ["a", 2],
            "correctAnswer": "A",
            "explanation": "e"
        }]);
        assert!(!validate_quiz_payload(&value));
    }

    #[test]
    fn non_array_payload_is_rejected() {
        assert!(!validate_quiz_payload(&json!({"questions": []})));
        assert!(!validate_flashcard_payload(&json!("nope")));
    }

    #[test]
    fn flashcard_missing_back_is_rejected() {
        let value = json!([{"id":1,"front":"term"}]);
        assert!(!validate_flashcard_payload(&value));
        assert!(flashcards_from_value(&value).is_err());
    }

    #[test]
    fn garbage_text_is_a_json_error() {
        assert!(matches!(parse_flashcards("not json"), Err(ContentError::Json(_))));
    }

    #[test]
    fn oversized_front_passes_validation_but_is_truncated() {
        let long_front = "x".repeat(800);
        let value = json!([{"id":1,"front":long_front,"back":"short"}]);
        assert!(validate_flashcard_payload(&value));

        let cards = sanitize_flashcards(flashcards_from_value(&value).unwrap());
        assert_eq!(cards[0].front.chars().count(), MAX_FRONT_CHARS);
        assert_eq!(cards[0].back, "short");
    }

    #[test]
    fn sanitize_quiz_bounds_every_field() {
        let questions = vec![QuizQuestion {
            id: 1,
            question: "q".repeat(2_000),
            options: vec!["o".repeat(700), "ok".into()],
            correct_answer: "ABCDEFGHIJKLMN".into(),
            explanation: "e".repeat(900),
        }];
        let sanitized = sanitize_quiz(questions);
        assert_eq!(sanitized[0].question.chars().count(), MAX_QUESTION_CHARS);
        assert_eq!(sanitized[0].options[0].chars().count(), MAX_OPTION_CHARS);
        assert_eq!(sanitized[0].options[1], "ok");
        assert_eq!(sanitized[0].correct_answer.chars().count(), MAX_ANSWER_CHARS);
        assert_eq!(sanitized[0].explanation.chars().count(), MAX_EXPLANATION_CHARS);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let cards = vec![Flashcard { id: 1, front: "é".repeat(600), back: "日".repeat(1_200) }];
        let sanitized = sanitize_flashcards(cards);
        assert_eq!(sanitized[0].front.chars().count(), MAX_FRONT_CHARS);
        assert_eq!(sanitized[0].back.chars().count(), MAX_BACK_CHARS);
        // Still valid UTF-8 end to end; no partial code points.
        assert!(sanitized[0].back.chars().all(|c| c == '日'));
    }
}
