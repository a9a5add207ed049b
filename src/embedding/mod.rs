//! Text-to-vector embedders shared by the index builder and the retriever.
//!
//! Both sides must use the same embedder; the index records
//! [`Embedder::model_version`] and the retriever refuses a mismatching one.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::{EmbeddingProviderKind, RagSettings};
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

pub mod hashing;
pub mod remote;

pub use hashing::HashingEmbedder;
pub use remote::ProviderEmbedder;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier persisted alongside the index.
    fn model_version(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}

pub fn from_settings(
    settings: &RagSettings,
    provider: Arc<dyn LlmProvider>,
) -> Arc<dyn Embedder> {
    match settings.embedding.provider {
        EmbeddingProviderKind::OpenAi => Arc::new(ProviderEmbedder::new(
            provider,
            settings.embedding.model.trim(),
        )),
        EmbeddingProviderKind::Hashing => {
            Arc::new(HashingEmbedder::new(settings.embedding.dimension))
        }
    }
}
