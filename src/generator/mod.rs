//! Answer generation over the grounded and general-knowledge paths.

use std::sync::Arc;

use crate::core::config::RagSettings;
use crate::core::errors::ApiError;
use crate::llm::{with_transport_retry, ChatMessage, ChatRequest, LlmProvider, TextStream};
use crate::rag::RetrievedChunk;

mod language;

pub use language::Language;

const GROUNDED_TEMPLATE: &str = r#"You are 'PokéGPT', a Pokémon expert. Answer the user's question based ONLY on the provided 'Context'.
If the 'Context' does NOT contain the answer, respond exactly with: "{refusal}"
Answer ONLY in the language specified: {language}

Context: {context}

Question: {question}
Helpful Answer:"#;

const GENERAL_TEMPLATE: &str = r#"Answer the following question using your general knowledge, like a helpful assistant.
Answer ONLY in the language specified: {language}

Question: {question}
Helpful Answer:"#;

/// Numbered passages with their source, in retrieval order.
pub fn format_context(context: &[RetrievedChunk]) -> String {
    context
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] (Source: {})\n{}", i + 1, hit.source_id(), hit.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn grounded_prompt(question: &str, context: &[RetrievedChunk], language: Language) -> String {
    GROUNDED_TEMPLATE
        .replace("{refusal}", language.refusal())
        .replace("{language}", language.prompt_name())
        .replace("{context}", &format_context(context))
        .replace("{question}", question)
}

pub fn general_prompt(question: &str, language: Language) -> String {
    GENERAL_TEMPLATE
        .replace("{language}", language.prompt_name())
        .replace("{question}", question)
}

pub struct AnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    grounded_temperature: f32,
    general_temperature: f32,
    max_attempts: u32,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            grounded_temperature: 0.2,
            general_temperature: 0.5,
            max_attempts: 2,
        }
    }

    pub fn from_settings(settings: &RagSettings, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            model: settings.llm.chat_model.clone(),
            grounded_temperature: settings.generation.grounded_temperature,
            general_temperature: settings.generation.general_temperature,
            max_attempts: settings.llm.max_attempts.max(1),
        }
    }

    /// Streams an answer restricted to `context`. With no context at all the
    /// refusal is returned directly without calling the model.
    pub async fn generate_grounded(
        &self,
        question: &str,
        context: &[RetrievedChunk],
        language: Language,
    ) -> Result<TextStream, ApiError> {
        if context.is_empty() {
            tracing::info!("No context retrieved; answering with the refusal");
            return Ok(TextStream::from_fragments([language.refusal().to_string()]));
        }
        let prompt = grounded_prompt(question, context, language);
        self.stream(prompt, self.grounded_temperature).await
    }

    pub async fn generate_general(
        &self,
        question: &str,
        language: Language,
    ) -> Result<TextStream, ApiError> {
        let prompt = general_prompt(question, language);
        self.stream(prompt, self.general_temperature).await
    }

    async fn stream(&self, prompt: String, temperature: f32) -> Result<TextStream, ApiError> {
        with_transport_retry(self.max_attempts, "answer generation", || {
            let request =
                ChatRequest::new(vec![ChatMessage::user(prompt.clone())]).with_temperature(temperature);
            self.provider.stream_chat(request, &self.model)
        })
        .await
    }
}
