//! Recursive, boundary-preferring text splitter.
//!
//! Offsets and lengths are counted in `char`s, so multi-byte text never gets
//! cut inside a code point.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::ApiError;

/// Separator groups, coarsest first. A cut is made after the separator.
const BOUNDARY_LEVELS: [&[&str]; 4] = [
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? "],
    &[" ", "\t"],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    /// Position of the chunk within its document, from 0.
    pub seq: usize,
    /// Char offset of the chunk's first character in the document.
    pub start_offset: usize,
    pub text: String,
}

/// Stable identifier derived from the document and the chunk position.
pub fn chunk_id(source_id: &str, seq: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(seq.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    config: SplitterConfig,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig) -> Result<Self, ApiError> {
        if config.chunk_size == 0 {
            return Err(ApiError::Config("chunk_size must be positive".to_string()));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(ApiError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> SplitterConfig {
        self.config
    }

    /// Splits `text` into chunks of at most `chunk_size` chars. Every chunk
    /// after the first starts with the last `chunk_overlap` chars of its
    /// predecessor, so dropping that prefix and concatenating restores `text`.
    pub fn split(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + size).min(total);
            let cut = if end == total {
                total
            } else {
                find_cut(&chars, start + overlap, end)
            };

            let seq = chunks.len();
            chunks.push(Chunk {
                chunk_id: chunk_id(source_id, seq),
                source_id: source_id.to_string(),
                seq,
                start_offset: start,
                text: chars[start..cut].iter().collect(),
            });

            if cut == total {
                break;
            }
            start = cut - overlap;
        }

        chunks
    }
}

/// Last boundary end in `(min_cut, end]`, trying coarse boundaries first.
/// `min_cut` keeps every chunk longer than the overlap so the walk advances.
fn find_cut(chars: &[char], min_cut: usize, end: usize) -> usize {
    for level in BOUNDARY_LEVELS {
        let mut best: Option<usize> = None;
        for separator in level {
            let sep: Vec<char> = separator.chars().collect();
            if let Some(pos) = last_separator_end(chars, &sep, min_cut, end) {
                best = Some(best.map_or(pos, |b| b.max(pos)));
            }
        }
        if let Some(pos) = best {
            return pos;
        }
    }
    end
}

fn last_separator_end(chars: &[char], sep: &[char], min_cut: usize, end: usize) -> Option<usize> {
    let mut sep_end = end;
    while sep_end > min_cut {
        if sep_end >= sep.len() && chars[sep_end - sep.len()..sep_end] == *sep {
            return Some(sep_end);
        }
        sep_end -= 1;
    }
    None
}
