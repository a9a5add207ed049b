//! Routes a question to the grounded or the general-knowledge path.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::RagSettings;
use crate::llm::{with_transport_retry, ChatMessage, ChatRequest, LlmProvider};

const CLASSIFIER_PROMPT: &str = r#"Your task is to classify the user's question into one of two categories: 'pokemon' or 'general'.
Focus ONLY on the main subject of the question.

- If the question is about ANYTHING related to the Pokémon universe (e.g., specific Pokémon, abilities, items, characters, games, anime, types, evolution, regions, mechanics), classify it as 'pokemon'.
- If the question is about ANYTHING ELSE (e.g., current events, math, science, history, coding, personal questions, greetings, requests unrelated to Pokémon), classify it as 'general'.

**CRITICAL:** Respond with **only** the single word 'pokemon' or 'general'. No other words, no explanation.

Examples:
Question: What type is Pikachu? -> Response: pokemon
Question: Tell me about the Static ability. -> Response: pokemon
Question: Who is Ash Ketchum? -> Response: pokemon
Question: What year is it? -> Response: general
Question: Write a python function. -> Response: general
Question: Hi, how are you? -> Response: general
Question: What is the capital of Turkey? -> Response: general

User Question: {question}
Response:"#;

/// Enough for one label word plus stray whitespace.
const CLASSIFIER_MAX_TOKENS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionLabel {
    /// Needs retrieval from the Pokémon corpus.
    Domain,
    General,
}

impl QuestionLabel {
    /// Normalizes raw model output. Anything unrecognized is `General`.
    pub fn parse_label(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pokemon" | "pokémon" | "domain" => QuestionLabel::Domain,
            _ => QuestionLabel::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionLabel::Domain => "domain",
            QuestionLabel::General => "general",
        }
    }
}

impl fmt::Display for QuestionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct QuestionClassifier {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
    max_attempts: u32,
}

impl QuestionClassifier {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_attempts: 2,
        }
    }

    pub fn from_settings(settings: &RagSettings, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: settings.llm.chat_model.clone(),
            temperature: settings.generation.classifier_temperature,
            max_attempts: settings.llm.max_attempts.max(1),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn request(&self, question: &str) -> ChatRequest {
        let prompt = CLASSIFIER_PROMPT.replace("{question}", question);
        ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(self.temperature)
            .with_max_tokens(CLASSIFIER_MAX_TOKENS)
    }

    /// Never fails: unexpected labels and exhausted retries both yield
    /// [`QuestionLabel::General`].
    pub async fn classify(&self, question: &str) -> QuestionLabel {
        let result = with_transport_retry(self.max_attempts, "classification", || {
            self.provider.chat(self.request(question), &self.model)
        })
        .await;

        let label = match result {
            Ok(raw) => {
                let label = QuestionLabel::parse_label(&raw);
                if label == QuestionLabel::General && !raw.trim().eq_ignore_ascii_case("general") {
                    tracing::warn!("Unrecognized classifier output {:?}; using general", raw);
                }
                label
            }
            Err(err) => {
                tracing::warn!("Classification failed ({}); using general", err);
                QuestionLabel::General
            }
        };
        tracing::info!("Question classified as {}", label);
        label
    }
}
