use std::sync::Arc;

use super::store::{RetrievedChunk, VectorIndex};
use crate::core::errors::ApiError;
use crate::embedding::Embedder;
use crate::llm::with_transport_retry;

/// Read-only similarity search over a loaded index. Cheap to clone and safe
/// to share between concurrent requests.
#[derive(Clone)]
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    top_k: usize,
    max_attempts: u32,
}

impl VectorRetriever {
    /// Fails with [`ApiError::IndexMismatch`] when the index was built with a
    /// different embedding model than `embedder`.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        top_k: usize,
    ) -> Result<Self, ApiError> {
        index.ensure_model(embedder.model_version())?;
        Ok(Self {
            embedder,
            index,
            top_k: top_k.max(1),
            max_attempts: 2,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// At most `k` chunks ordered by non-increasing score.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, ApiError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = [query.to_string()];
        let mut vectors = with_transport_retry(self.max_attempts, "query embedding", || {
            self.embedder.embed(&inputs)
        })
        .await?;
        let Some(query_vector) = vectors.pop() else {
            return Err(ApiError::Internal("embedder returned no query vector".into()));
        };

        let hits = self.index.search(&query_vector, k)?;
        match hits.first() {
            Some(top) => tracing::debug!(
                "Retrieved {} chunks, top {} ({:.3})",
                hits.len(),
                top.source_id(),
                top.score
            ),
            None => tracing::debug!("Retrieved no chunks"),
        }
        Ok(hits)
    }

    /// [`Self::retrieve`] with the configured `top_k`.
    pub async fn retrieve_default(&self, query: &str) -> Result<Vec<RetrievedChunk>, ApiError> {
        self.retrieve(query, self.top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashingEmbedder, ProviderEmbedder};
    use crate::llm::testing::ScriptedProvider;
    use crate::rag::builder::IndexBuilder;
    use crate::rag::document::Document;
    use crate::rag::splitter::{SplitterConfig, TextSplitter};

    async fn build(docs: Vec<Document>, embedder: Arc<dyn Embedder>) -> Arc<VectorIndex> {
        let splitter = TextSplitter::new(SplitterConfig::default()).unwrap();
        let (index, _) = IndexBuilder::new(embedder, splitter)
            .build(&docs)
            .await
            .unwrap();
        Arc::new(index)
    }

    fn pokedex() -> Vec<Document> {
        vec![
            Document::new(
                "Pikachu.txt",
                "Pikachu is an Electric-type Pokémon known for Static ability.",
            ),
            Document::new("Bulbasaur.txt", "Bulbasaur is a Grass and Poison type seed Pokémon."),
            Document::new("Snorlax.txt", "Snorlax sleeps most of the day and blocks roads."),
            Document::new("Lapras.txt", "Lapras ferries people across the sea."),
            Document::new("Gengar.txt", "Gengar hides in shadows and is a Ghost type."),
            Document::new("Onix.txt", "Onix is a giant rock snake found in caves."),
        ]
    }

    #[tokio::test]
    async fn single_document_scenario_returns_it_first() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256));
        let index = build(pokedex(), embedder.clone()).await;
        let retriever = VectorRetriever::new(embedder, index, 5).unwrap();

        let hits = retriever.retrieve("What type is Pikachu", 5).await.unwrap();

        assert_eq!(hits[0].source_id(), "Pikachu.txt");
        assert!(hits.len() <= 5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn result_count_never_exceeds_k() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128));
        let index = build(pokedex(), embedder.clone()).await;
        let retriever = VectorRetriever::new(embedder, index, 5).unwrap();

        assert_eq!(retriever.retrieve("pokemon", 2).await.unwrap().len(), 2);
        assert_eq!(retriever.retrieve_default("pokemon").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn mismatched_embedder_is_rejected() {
        let index = build(pokedex(), Arc::new(HashingEmbedder::new(64))).await;
        let err = VectorRetriever::new(Arc::new(HashingEmbedder::new(128)), index, 5)
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::IndexMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_index_skips_embedding() {
        let provider = Arc::new(ScriptedProvider::new());
        let embedder: Arc<dyn Embedder> = Arc::new(ProviderEmbedder::new(provider.clone(), "e"));
        let index = build(Vec::new(), embedder.clone()).await;
        let retriever = VectorRetriever::new(embedder, index, 5).unwrap();

        assert!(retriever.retrieve("anything", 5).await.unwrap().is_empty());
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_queries_share_the_index() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128));
        let index = build(pokedex(), embedder.clone()).await;
        let retriever = VectorRetriever::new(embedder, index, 3).unwrap();

        let handles: Vec<_> = ["Pikachu", "Snorlax", "Lapras", "Gengar"]
            .into_iter()
            .map(|name| {
                let retriever = retriever.clone();
                tokio::spawn(async move {
                    let hits = retriever.retrieve_default(name).await.unwrap();
                    (name, hits[0].source_id().to_string())
                })
            })
            .collect();

        for handle in handles {
            let (name, top) = handle.await.unwrap();
            assert_eq!(top, format!("{}.txt", name));
        }
    }

    #[tokio::test]
    async fn query_embedding_retries_transport_failures() {
        let provider = Arc::new(ScriptedProvider::new());
        let embedder: Arc<dyn Embedder> = Arc::new(ProviderEmbedder::new(provider.clone(), "e"));
        let index = build(pokedex(), embedder.clone()).await;
        let retriever = VectorRetriever::new(embedder, index, 5).unwrap();
        let calls_after_build = provider.embed_calls();

        provider.push_embed_failure(ApiError::transport("timeout"));
        let hits = retriever.retrieve("Pikachu", 1).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(provider.embed_calls(), calls_after_build + 2);
    }
}
