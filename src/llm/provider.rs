use async_trait::async_trait;

use super::stream::TextStream;
use super::types::ChatRequest;
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError>;

    /// chat completion (streaming); resolves once the backend has accepted the request
    async fn stream_chat(&self, request: ChatRequest, model_id: &str)
        -> Result<TextStream, ApiError>;

    /// generate embeddings, one vector per input in input order
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}
