use std::sync::Arc;

use async_trait::async_trait;

use super::Embedder;
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

/// Embeds through the configured LLM backend's embeddings endpoint.
pub struct ProviderEmbedder {
    provider: Arc<dyn LlmProvider>,
    model: String,
    version: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn LlmProvider>, model: &str) -> Self {
        let version = format!("{}:{}", provider.name(), model);
        Self {
            provider,
            model: model.to_string(),
            version,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn model_version(&self) -> &str {
        &self.version
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.provider.embed(inputs, &self.model).await?;
        if vectors.len() != inputs.len() {
            return Err(ApiError::Internal(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}
