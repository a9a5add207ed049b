//! Offline Document Store Builder: chunk, embed, replace the persisted index.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::document::Document;
use super::splitter::{Chunk, SplitterConfig, TextSplitter};
use super::store::{IndexEntry, IndexMetadata, IndexStore, VectorIndex};
use crate::core::config::RagSettings;
use crate::core::errors::ApiError;
use crate::embedding::Embedder;
use crate::llm::with_transport_retry;

#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub seq: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub failed: Vec<FailedChunk>,
}

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
    batch_size: usize,
    max_attempts: u32,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>, splitter: TextSplitter) -> Self {
        Self {
            embedder,
            splitter,
            batch_size: 64,
            max_attempts: 2,
        }
    }

    pub fn from_settings(
        settings: &RagSettings,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ApiError> {
        let splitter = TextSplitter::new(SplitterConfig {
            chunk_size: settings.indexing.chunk_size,
            chunk_overlap: settings.indexing.chunk_overlap,
        })?;
        Ok(Self::new(embedder, splitter)
            .with_batch_size(settings.embedding.batch_size)
            .with_max_attempts(settings.llm.max_attempts))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn chunk_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|doc| self.splitter.split(&doc.source_id, &doc.text))
            .collect()
    }

    /// Embeds chunks in batches. A failed batch is retried chunk by chunk so
    /// one bad chunk only drops itself.
    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> (Vec<IndexEntry>, Vec<FailedChunk>) {
        let mut entries: Vec<IndexEntry> = Vec::with_capacity(chunks.len());
        let mut failed = Vec::new();
        let mut dimension: Option<usize> = None;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match self.embed_with_retry(&texts).await {
                Ok(vectors) => {
                    for (chunk, vector) in batch.iter().zip(vectors) {
                        accept(chunk, vector, &mut dimension, &mut entries, &mut failed);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "Embedding batch of {} chunks failed ({}); falling back to single chunks",
                        batch.len(),
                        err
                    );
                    for chunk in batch {
                        match self.embed_with_retry(std::slice::from_ref(&chunk.text)).await {
                            Ok(mut vectors) if vectors.len() == 1 => {
                                let vector = vectors.remove(0);
                                accept(chunk, vector, &mut dimension, &mut entries, &mut failed);
                            }
                            Ok(_) => reject(chunk, "embedder returned no vector".into(), &mut failed),
                            Err(err) => reject(chunk, err.to_string(), &mut failed),
                        }
                    }
                }
            }
        }

        (entries, failed)
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let vectors = with_transport_retry(self.max_attempts, "embedding", || {
            self.embedder.embed(texts)
        })
        .await?;
        if vectors.len() != texts.len() {
            return Err(ApiError::Internal(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Builds the whole index in memory.
    pub async fn build(
        &self,
        documents: &[Document],
    ) -> Result<(VectorIndex, BuildReport), ApiError> {
        let chunks = self.chunk_documents(documents);
        let chunk_total = chunks.len();
        tracing::info!(
            "Chunked {} documents into {} chunks",
            documents.len(),
            chunk_total
        );

        let (entries, failed) = self.embed_chunks(chunks).await;
        if chunk_total > 0 && entries.is_empty() {
            return Err(ApiError::Internal(format!(
                "none of the {} chunks could be embedded; first error: {}",
                chunk_total,
                failed
                    .first()
                    .map(|f| f.reason.as_str())
                    .unwrap_or("unknown")
            )));
        }

        let config = self.splitter.config();
        let metadata = IndexMetadata {
            embedding_model: self.embedder.model_version().to_string(),
            dimension: entries.first().map(|e| e.embedding.len()).unwrap_or(0),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            chunk_count: entries.len(),
            built_at: Utc::now(),
        };
        let report = BuildReport {
            documents: documents.len(),
            chunks: chunk_total,
            embedded: entries.len(),
            failed,
        };

        Ok((VectorIndex::new(metadata, entries)?, report))
    }

    /// Builds and replaces `store`'s contents in one batch. On error the
    /// store keeps its previous index.
    pub async fn build_into(
        &self,
        documents: &[Document],
        store: &dyn IndexStore,
    ) -> Result<BuildReport, ApiError> {
        let (index, report) = self.build(documents).await?;
        store.replace_all(index.metadata(), index.entries()).await?;
        Ok(report)
    }
}

fn accept(
    chunk: &Chunk,
    vector: Vec<f32>,
    dimension: &mut Option<usize>,
    entries: &mut Vec<IndexEntry>,
    failed: &mut Vec<FailedChunk>,
) {
    if vector.is_empty() {
        reject(chunk, "empty embedding".into(), failed);
        return;
    }
    let expected = *dimension.get_or_insert(vector.len());
    if vector.len() != expected {
        reject(
            chunk,
            format!("dimension {} differs from {}", vector.len(), expected),
            failed,
        );
        return;
    }
    entries.push(IndexEntry {
        chunk: chunk.clone(),
        embedding: vector,
    });
}

fn reject(chunk: &Chunk, reason: String, failed: &mut Vec<FailedChunk>) {
    tracing::warn!(
        "Dropping chunk {}#{} from the index: {}",
        chunk.source_id,
        chunk.seq,
        reason
    );
    failed.push(FailedChunk {
        chunk_id: chunk.chunk_id.clone(),
        source_id: chunk.source_id.clone(),
        seq: chunk.seq,
        reason,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashingEmbedder, ProviderEmbedder};
    use crate::llm::testing::ScriptedProvider;
    use crate::rag::sqlite::SqliteIndexStore;

    fn splitter() -> TextSplitter {
        TextSplitter::new(SplitterConfig {
            chunk_size: 120,
            chunk_overlap: 20,
        })
        .unwrap()
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new(
                "Pikachu.txt",
                "Pikachu is an Electric-type Pokémon known for Static ability.",
            ),
            Document::new(
                "Snorlax.txt",
                "Snorlax is a Normal-type Pokémon. It sleeps most of the day and wakes only to eat. \
                 Its Thick Fat ability halves damage from Fire and Ice moves.",
            ),
        ]
    }

    #[tokio::test]
    async fn build_embeds_every_chunk_and_records_the_model() {
        let builder = IndexBuilder::new(Arc::new(HashingEmbedder::new(64)), splitter());
        let (index, report) = builder.build(&corpus()).await.unwrap();

        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks, report.embedded);
        assert!(report.failed.is_empty());
        assert_eq!(index.len(), report.chunks);
        assert_eq!(index.metadata().embedding_model, "hashing-v1:64");
        assert_eq!(index.metadata().dimension, 64);
        assert_eq!(index.metadata().chunk_size, 120);
    }

    #[tokio::test]
    async fn rebuilding_identical_inputs_is_idempotent() {
        let builder = IndexBuilder::new(Arc::new(HashingEmbedder::new(32)), splitter());
        let (first, _) = builder.build(&corpus()).await.unwrap();
        let (second, _) = builder.build(&corpus()).await.unwrap();
        assert_eq!(first.entries(), second.entries());
    }

    #[tokio::test]
    async fn failing_chunk_is_dropped_without_losing_the_batch() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.poison_embeddings_containing("Snorlax");
        let embedder = Arc::new(ProviderEmbedder::new(provider.clone(), "embed"));
        let builder = IndexBuilder::new(embedder, splitter()).with_batch_size(16);

        let (index, report) = builder.build(&corpus()).await.unwrap();

        assert!(!report.failed.is_empty());
        assert!(report.failed.iter().all(|f| f.source_id == "Snorlax.txt"));
        assert!(index
            .entries()
            .iter()
            .any(|e| e.chunk.source_id == "Pikachu.txt"));
        assert_eq!(report.embedded + report.failed.len(), report.chunks);
        // one batch call, then one call per chunk
        assert_eq!(provider.embed_calls(), 1 + report.chunks);
    }

    #[tokio::test]
    async fn transient_transport_failure_is_retried() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_embed_failure(ApiError::transport("timeout"));
        let embedder = Arc::new(ProviderEmbedder::new(provider.clone(), "embed"));
        let builder = IndexBuilder::new(embedder, splitter()).with_batch_size(64);

        let (_, report) = builder.build(&corpus()).await.unwrap();

        assert!(report.failed.is_empty());
        assert_eq!(provider.embed_calls(), 2);
    }

    #[tokio::test]
    async fn total_failure_leaves_the_previous_index_intact() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::open(&dir.path().join("index.db"))
            .await
            .unwrap();

        let good = IndexBuilder::new(Arc::new(HashingEmbedder::new(16)), splitter());
        good.build_into(&corpus(), &store).await.unwrap();

        let provider = Arc::new(ScriptedProvider::new());
        provider.poison_embeddings_containing("Pokémon");
        let bad = IndexBuilder::new(
            Arc::new(ProviderEmbedder::new(provider, "embed")),
            splitter(),
        );
        assert!(bad.build_into(&corpus()[..1], &store).await.is_err());

        let meta = store.metadata().await.unwrap().unwrap();
        assert_eq!(meta.embedding_model, "hashing-v1:16");
    }

    #[tokio::test]
    async fn empty_corpus_builds_an_empty_index() {
        let builder = IndexBuilder::new(Arc::new(HashingEmbedder::new(16)), splitter());
        let (index, report) = builder.build(&[]).await.unwrap();
        assert!(index.is_empty());
        assert_eq!(report.chunks, 0);
    }
}
