//! SQLite-backed persisted index.
//!
//! Vectors are stored as little-endian `f32` blobs; search happens on the
//! in-memory [`VectorIndex`] loaded from this file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::splitter::Chunk;
use super::store::{IndexEntry, IndexMetadata, IndexStore, VectorIndex};
use crate::core::errors::ApiError;

pub struct SqliteIndexStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteIndexStore {
    /// Opens (creating if needed) an index file for building.
    pub async fn open(db_path: &Path) -> Result<Self, ApiError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ApiError::internal)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Opens an existing index without write access, as the server does.
    pub async fn open_read_only(db_path: &Path) -> Result<Self, ApiError> {
        if !db_path.exists() {
            return Err(ApiError::Config(format!(
                "no index at {}; build one with `pokegpt-index` first",
                db_path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_chunks (
                chunk_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                seq INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> IndexEntry {
        let seq: i64 = row.get("seq");
        let start_offset: i64 = row.get("start_offset");
        let embedding: Vec<u8> = row.get("embedding");

        IndexEntry {
            chunk: Chunk {
                chunk_id: row.get("chunk_id"),
                source_id: row.get("source"),
                seq: seq.max(0) as usize,
                start_offset: start_offset.max(0) as usize,
                text: row.get("content"),
            },
            embedding: Self::deserialize_embedding(&embedding),
        }
    }
}

fn meta_pairs(metadata: &IndexMetadata) -> [(&'static str, String); 6] {
    [
        ("embedding_model", metadata.embedding_model.clone()),
        ("dimension", metadata.dimension.to_string()),
        ("chunk_size", metadata.chunk_size.to_string()),
        ("chunk_overlap", metadata.chunk_overlap.to_string()),
        ("chunk_count", metadata.chunk_count.to_string()),
        ("built_at", metadata.built_at.to_rfc3339()),
    ]
}

fn parse_meta(rows: &[(String, String)]) -> Result<Option<IndexMetadata>, ApiError> {
    let get = |key: &str| {
        rows.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };
    let Some(model) = get("embedding_model") else {
        return Ok(None);
    };
    let number = |key: &str| -> Result<usize, ApiError> {
        get(key)
            .unwrap_or("0")
            .parse::<usize>()
            .map_err(|e| ApiError::Internal(format!("corrupt index metadata '{}': {}", key, e)))
    };
    let built_at = get("built_at")
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(Some(IndexMetadata {
        embedding_model: model.to_string(),
        dimension: number("dimension")?,
        chunk_size: number("chunk_size")?,
        chunk_overlap: number("chunk_overlap")?,
        chunk_count: number("chunk_count")?,
        built_at,
    }))
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn replace_all(
        &self,
        metadata: &IndexMetadata,
        entries: &[IndexEntry],
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM index_chunks")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        for entry in entries {
            let blob = Self::serialize_embedding(&entry.embedding);
            sqlx::query(
                "INSERT INTO index_chunks (chunk_id, source, seq, start_offset, content, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&entry.chunk.chunk_id)
            .bind(&entry.chunk.source_id)
            .bind(entry.chunk.seq as i64)
            .bind(entry.chunk.start_offset as i64)
            .bind(&entry.chunk.text)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        for (key, value) in meta_pairs(metadata) {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        tracing::info!(
            "Index at {} replaced with {} chunks ({})",
            self.db_path.display(),
            entries.len(),
            metadata.embedding_model
        );
        Ok(())
    }

    async fn load(&self) -> Result<VectorIndex, ApiError> {
        let Some(metadata) = self.metadata().await? else {
            return Err(ApiError::Config(format!(
                "index at {} has no metadata; rebuild it with `pokegpt-index`",
                self.db_path.display()
            )));
        };

        let rows = sqlx::query(
            "SELECT chunk_id, source, seq, start_offset, content, embedding
             FROM index_chunks
             ORDER BY source, seq",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let entries: Vec<IndexEntry> = rows.iter().map(Self::row_to_entry).collect();
        VectorIndex::new(metadata, entries)
    }

    async fn metadata(&self) -> Result<Option<IndexMetadata>, ApiError> {
        let rows = sqlx::query("SELECT key, value FROM index_meta")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        let pairs: Vec<(String, String)> = rows
            .iter()
            .map(|row| (row.get("key"), row.get("value")))
            .collect();
        parse_meta(&pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::store::tests::{entry, metadata};

    #[tokio::test]
    async fn replace_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let store = SqliteIndexStore::open(&path).await.unwrap();

        let entries = vec![
            entry("Pikachu.txt", 0, "Pikachu is Electric.", vec![0.5, -0.25, 1.0]),
            entry("Pikachu.txt", 1, "It evolves into Raichu.", vec![0.0, 1.0, 0.0]),
        ];
        store
            .replace_all(&metadata("hashing-v1:3", 3, 2), &entries)
            .await
            .unwrap();

        let index = store.load().await.unwrap();
        assert_eq!(index.metadata().embedding_model, "hashing-v1:3");
        assert_eq!(index.metadata().chunk_count, 2);
        assert_eq!(index.entries(), entries.as_slice());
    }

    #[tokio::test]
    async fn rebuild_replaces_instead_of_merging() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::open(&dir.path().join("index.db"))
            .await
            .unwrap();

        store
            .replace_all(
                &metadata("m:1", 2, 2),
                &[
                    entry("a.txt", 0, "old a", vec![1.0, 0.0]),
                    entry("b.txt", 0, "old b", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .replace_all(
                &metadata("m:2", 2, 1),
                &[entry("c.txt", 0, "new", vec![1.0, 1.0])],
            )
            .await
            .unwrap();

        let index = store.load().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].chunk.source_id, "c.txt");
        assert_eq!(index.metadata().embedding_model, "m:2");
    }

    #[tokio::test]
    async fn read_only_open_sees_built_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let writer = SqliteIndexStore::open(&path).await.unwrap();
            writer
                .replace_all(
                    &metadata("m:1", 2, 1),
                    &[entry("a.txt", 0, "a", vec![1.0, 0.0])],
                )
                .await
                .unwrap();
            writer.pool.close().await;
        }

        let reader = SqliteIndexStore::open_read_only(&path).await.unwrap();
        let index = reader.load().await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn missing_index_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteIndexStore::open_read_only(&dir.path().join("absent.db"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Config(ref msg) if msg.contains("pokegpt-index")));
    }

    #[tokio::test]
    async fn never_built_index_has_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::open(&dir.path().join("index.db"))
            .await
            .unwrap();
        assert!(store.metadata().await.unwrap().is_none());
        assert!(matches!(store.load().await, Err(ApiError::Config(_))));
    }
}
