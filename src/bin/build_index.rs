use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use pokegpt_backend::core::logging;
use pokegpt_backend::core::config::{AppPaths, ConfigService, RagSettings};
use pokegpt_backend::embedding;
use pokegpt_backend::llm::{LlmProvider, OpenAiCompatibleProvider};
use pokegpt_backend::rag::{load_corpus, IndexBuilder, SqliteIndexStore};

#[derive(Parser, Debug)]
#[command(
    name = "pokegpt-index",
    about = "Chunk and embed the Pokémon corpus, replacing the persisted vector index"
)]
struct IndexCli {
    /// Directory holding the scraped `*.txt` pages
    #[arg(long, env = "POKEGPT_CORPUS_DIR")]
    corpus_dir: Option<PathBuf>,

    /// Index database to replace
    #[arg(long, env = "POKEGPT_INDEX_PATH")]
    index_path: Option<PathBuf>,

    /// Alternate config.yml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = IndexCli::parse();
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths.log_dir, "index.log");

    let config = match cli.config {
        Some(path) => ConfigService::with_config_path(paths.clone(), path),
        None => ConfigService::new(paths.clone()),
    };
    let settings = RagSettings::load(&config).context("failed to load configuration")?;

    let provider: Arc<dyn LlmProvider> = Arc::new(
        OpenAiCompatibleProvider::new(
            &settings.llm.base_url,
            settings.api_key(),
            Duration::from_secs(settings.llm.request_timeout_secs),
        )
        .context("failed to create the embedding client")?,
    );
    let embedder = embedding::from_settings(&settings, provider);

    let corpus_dir = cli.corpus_dir.unwrap_or_else(|| settings.corpus_dir(&paths));
    let index_path = cli.index_path.unwrap_or_else(|| settings.index_path(&paths));

    let corpus = load_corpus(&corpus_dir, &settings.indexing.file_extension)
        .await
        .with_context(|| format!("failed to load corpus from {}", corpus_dir.display()))?;
    for skipped in &corpus.skipped {
        tracing::warn!("Skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    tracing::info!(
        "Loaded {} documents from {}",
        corpus.documents.len(),
        corpus_dir.display()
    );

    let builder = IndexBuilder::from_settings(&settings, embedder)?;
    let store = SqliteIndexStore::open(&index_path)
        .await
        .with_context(|| format!("failed to open index at {}", index_path.display()))?;
    let report = builder
        .build_into(&corpus.documents, &store)
        .await
        .context("index build failed; the previous index was left in place")?;

    for failed in &report.failed {
        tracing::warn!(
            "Chunk {} of {} was not indexed: {}",
            failed.seq,
            failed.source_id,
            failed.reason
        );
    }
    tracing::info!(
        "Indexed {} of {} chunks from {} documents into {}",
        report.embedded,
        report.chunks,
        report.documents,
        index_path.display()
    );
    println!(
        "Indexed {} chunks ({} failed) into {}",
        report.embedded,
        report.failed.len(),
        index_path.display()
    );
    Ok(())
}
