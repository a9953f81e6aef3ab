#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use studygate::{ContentRequest, Difficulty, GenerationError, TextGenerator};

/// Generation backend driven by a pre-loaded script of responses.
///
/// Every call pops the next scripted result; an exhausted script fails the
/// call, which keeps a test from silently looping forever. Prompts are
/// recorded for assertions.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<VecDeque<Result<String, GenerationError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, text: impl Into<String>) -> &Self {
        self.script.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn push_err(&self, error: GenerationError) -> &Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    /// How many times the backend was invoked.
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate_text(
        &self,
        prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Unreachable("script exhausted".into())))
    }
}

/// A quiz payload with `count` well-formed questions.
pub fn quiz_json(count: u32) -> String {
    let items: Vec<String> = (1..=count)
        .map(|id| {
            format!(
                r#"{{"id":{id},"question":"Question {id}?","options":["A) yes","B) no"],"correctAnswer":"A","explanation":"because"}}"#
            )
        })
        .collect();
    format!("[{}]", items.join(","))
}

/// A flashcard payload with `count` well-formed cards.
pub fn flashcard_json(count: u32) -> String {
    let items: Vec<String> = (1..=count)
        .map(|id| format!(r#"{{"id":{id},"front":"term {id}","back":"definition {id}"}}"#))
        .collect();
    format!("[{}]", items.join(","))
}

pub fn quiz_request(subject: &str) -> ContentRequest {
    ContentRequest {
        subject: subject.into(),
        grade: "9-10".into(),
        difficulty: Difficulty::Beginner,
        count: 2,
        learning_style: None,
    }
}
