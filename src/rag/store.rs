//! Index storage seam and the in-memory index used at serve time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::splitter::Chunk;
use crate::core::errors::ApiError;
use crate::vector_math::rank_descending_by_cosine;

/// A chunk paired with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// `Embedder::model_version` of the embedder that produced the vectors.
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

impl RetrievedChunk {
    pub fn source_id(&self) -> &str {
        &self.chunk.source_id
    }
}

/// Persistent home of a built index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Replaces the whole index atomically: readers see either the previous
    /// index or the new one, never a mix.
    async fn replace_all(
        &self,
        metadata: &IndexMetadata,
        entries: &[IndexEntry],
    ) -> Result<(), ApiError>;

    async fn load(&self) -> Result<VectorIndex, ApiError>;

    async fn metadata(&self) -> Result<Option<IndexMetadata>, ApiError>;
}

/// Immutable, fully loaded index. Shared across requests behind an `Arc`;
/// searching needs no locking.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    metadata: IndexMetadata,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(metadata: IndexMetadata, entries: Vec<IndexEntry>) -> Result<Self, ApiError> {
        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.len() != metadata.dimension)
        {
            return Err(ApiError::Internal(format!(
                "chunk {} has dimension {}, index expects {}",
                bad.chunk.chunk_id,
                bad.embedding.len(),
                metadata.dimension
            )));
        }
        Ok(Self { metadata, entries })
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails when the index was embedded with a different model.
    pub fn ensure_model(&self, model_version: &str) -> Result<(), ApiError> {
        if self.metadata.embedding_model != model_version {
            return Err(ApiError::IndexMismatch {
                expected: model_version.to_string(),
                found: self.metadata.embedding_model.clone(),
            });
        }
        Ok(())
    }

    /// Top `k` entries by descending cosine similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, ApiError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let ranked = rank_descending_by_cosine(
            query,
            self.entries.iter().map(|e| e.embedding.as_slice()),
        )?;

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(idx, score)| RetrievedChunk {
                chunk: self.entries[idx].chunk.clone(),
                score,
            })
            .collect())
    }
}
