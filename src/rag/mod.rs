//! Retrieval side of the assistant.
//!
//! - `document` / `splitter`: corpus loading and chunking
//! - `builder`: offline index construction
//! - `store` / `sqlite`: persisted index and the in-memory `VectorIndex`
//! - `retriever`: query-time similarity search

pub mod builder;
pub mod document;
pub mod retriever;
pub mod splitter;
pub mod sqlite;
pub mod store;

pub use builder::{BuildReport, FailedChunk, IndexBuilder};
pub use document::{load_corpus, Corpus, Document, SkippedDocument};
pub use retriever::VectorRetriever;
pub use splitter::{Chunk, SplitterConfig, TextSplitter};
pub use sqlite::SqliteIndexStore;
pub use store::{IndexEntry, IndexMetadata, IndexStore, RetrievedChunk, VectorIndex};
