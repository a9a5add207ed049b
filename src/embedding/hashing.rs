use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Embedder;
use crate::core::errors::ApiError;

/// Offline embedder: signed feature hashing of lowercase alphanumeric tokens.
///
/// Deterministic across runs and machines, so indexes built with it can be
/// reopened without any model service.
pub struct HashingEmbedder {
    dimension: usize,
    version: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            version: format!("hashing-v1:{}", dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// L2-normalized hashed bag of words; all zeros when `text` has no tokens.
pub fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut vector = vec![0.0f32; dimension];

    for token in tokens(text) {
        let digest = Sha256::digest(token.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_version(&self) -> &str {
        &self.version
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs
            .iter()
            .map(|input| hash_embed(input, self.dimension))
            .collect())
    }
}
