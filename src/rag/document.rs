//! Plain-text documents read from the scraped corpus directory.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File name within the corpus directory, e.g. `Pikachu.txt`.
    pub source_id: String,
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedDocument>,
}

/// Reads every `*.<extension>` file directly under `dir`, sorted by file name.
///
/// Infobox files (`<name>_infobox.txt`) are loaded like any other document.
/// Files that are not valid UTF-8, cannot be read, or hold only whitespace
/// are reported in [`Corpus::skipped`] instead of failing the load.
pub async fn load_corpus(dir: &Path, extension: &str) -> Result<Corpus, ApiError> {
    let extension = extension.trim_start_matches('.');
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        ApiError::Config(format!(
            "corpus directory {} is not readable: {}",
            dir.display(),
            e
        ))
    })?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(ApiError::internal)? {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if is_file && matches_ext {
            paths.push(path);
        }
    }
    paths.sort();

    let mut corpus = Corpus::default();
    for path in paths {
        let source_id = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                corpus.skip(path, format!("unreadable: {}", e));
                continue;
            }
        };
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                corpus.skip(path, format!("not valid UTF-8: {}", e.utf8_error()));
                continue;
            }
        };
        if text.trim().is_empty() {
            corpus.skip(path, "empty document".to_string());
            continue;
        }

        corpus.documents.push(Document { source_id, text });
    }

    Ok(corpus)
}

impl Corpus {
    fn skip(&mut self, path: PathBuf, reason: String) {
        tracing::warn!("Skipping document {}: {}", path.display(), reason);
        self.skipped.push(SkippedDocument { path, reason });
    }
}
