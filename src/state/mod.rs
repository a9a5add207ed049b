use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::classifier::QuestionClassifier;
use crate::core::config::{AppPaths, ConfigService, RagSettings};
use crate::core::security::{init_session_token, SessionToken};
use crate::embedding::{self, Embedder};
use crate::generator::AnswerGenerator;
use crate::llm::{LlmProvider, OpenAiCompatibleProvider};
use crate::pipeline::Assistant;
use crate::rag::{IndexMetadata, IndexStore, SqliteIndexStore, VectorIndex, VectorRetriever};
use crate::session::SessionRegistry;

pub mod error;

pub use error::InitializationError;

/// Application state shared across all routes.
///
/// Everything except `sessions` is read-only once initialized; each session
/// carries its own lock inside the registry.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<RagSettings>,
    pub assistant: Arc<Assistant>,
    pub sessions: SessionRegistry,
    pub session_token: SessionToken,
    pub index_metadata: IndexMetadata,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Loads configuration, opens the index read-only and wires the services.
    /// Any failure here is fatal; nothing is served with a partial state.
    pub async fn initialize() -> Result<Arc<Self>, InitializationError> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());
        Self::initialize_with(paths, config).await
    }

    pub async fn initialize_with(
        paths: Arc<AppPaths>,
        config: ConfigService,
    ) -> Result<Arc<Self>, InitializationError> {
        let settings =
            RagSettings::load(&config).map_err(|e| InitializationError::Config(e.into()))?;

        let provider: Arc<dyn LlmProvider> = Arc::new(
            OpenAiCompatibleProvider::new(
                &settings.llm.base_url,
                settings.api_key(),
                Duration::from_secs(settings.llm.request_timeout_secs),
            )
            .map_err(|e| InitializationError::Llm(e.into()))?,
        );
        let embedder = embedding::from_settings(&settings, provider.clone());

        let index_path = settings.index_path(&paths);
        let store = SqliteIndexStore::open_read_only(&index_path)
            .await
            .map_err(|e| InitializationError::Index(e.into()))?;
        let index = store
            .load()
            .await
            .map_err(|e| InitializationError::Index(e.into()))?;
        tracing::info!(
            "Loaded index from {} ({} chunks, {})",
            index_path.display(),
            index.len(),
            index.metadata().embedding_model
        );

        Self::from_parts(paths, config, settings, provider, embedder, Arc::new(index))
    }

    /// Wires already-constructed services. Tests use this with fakes.
    pub fn from_parts(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: RagSettings,
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
    ) -> Result<Arc<Self>, InitializationError> {
        let index_metadata = index.metadata().clone();
        let retriever = VectorRetriever::new(embedder, index, settings.retrieval.top_k)
            .map_err(|e| InitializationError::Index(e.into()))?
            .with_max_attempts(settings.llm.max_attempts);
        let classifier = QuestionClassifier::from_settings(&settings, provider.clone());
        let generator = AnswerGenerator::from_settings(&settings, provider);
        let session_token = init_session_token(&paths);

        Ok(Arc::new(AppState {
            paths,
            config,
            settings: Arc::new(settings),
            assistant: Arc::new(Assistant::new(classifier, retriever, generator)),
            sessions: SessionRegistry::new(),
            session_token,
            index_metadata,
            started_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::llm::testing::ScriptedProvider;
    use crate::rag::{Document, IndexBuilder, SplitterConfig, TextSplitter};
    use serde_json::json;

    pub(crate) struct TestApp {
        pub state: Arc<AppState>,
        pub provider: Arc<ScriptedProvider>,
        pub _dir: tempfile::TempDir,
    }

    pub(crate) fn pikachu_docs() -> Vec<Document> {
        vec![Document::new(
            "Pikachu.txt",
            "Pikachu is an Electric-type Pokémon known for Static ability.",
        )]
    }

    pub(crate) async fn test_app(docs: Vec<Document>) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_dirs(
            dir.path().join("root"),
            dir.path().join("data"),
        ));
        let config =
            ConfigService::with_config_path(paths.clone(), dir.path().join("config.yml"));
        let settings = RagSettings::from_value(&json!({
            "llm": { "api_key": "sk-test-secret" },
            "embedding": { "provider": "hashing", "dimension": 256 }
        }))
        .unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256));
        let (index, _) = IndexBuilder::new(
            embedder.clone(),
            TextSplitter::new(SplitterConfig::default()).unwrap(),
        )
        .build(&docs)
        .await
        .unwrap();

        let provider = Arc::new(ScriptedProvider::new());
        let state = AppState::from_parts(
            paths,
            config,
            settings,
            provider.clone(),
            embedder,
            Arc::new(index),
        )
        .unwrap();

        TestApp {
            state,
            provider,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn mismatched_index_fails_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_dirs(
            dir.path().join("root"),
            dir.path().join("data"),
        ));
        let config = ConfigService::with_config_path(paths.clone(), dir.path().join("c.yml"));
        let settings = RagSettings::from_value(&json!({ "llm": { "api_key": "k" } })).unwrap();
        let (index, _) = IndexBuilder::new(
            Arc::new(HashingEmbedder::new(32)),
            TextSplitter::new(SplitterConfig::default()).unwrap(),
        )
        .build(&[])
        .await
        .unwrap();

        let result = AppState::from_parts(
            paths,
            config,
            settings,
            Arc::new(ScriptedProvider::new()),
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(index),
        );
        assert!(matches!(result, Err(InitializationError::Index(_))));
    }

    #[tokio::test]
    async fn missing_credential_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_dirs(
            dir.path().join("root"),
            dir.path().join("data"),
        ));
        std::fs::write(
            dir.path().join("config.yml"),
            "llm:\n  base_url: http://127.0.0.1:9/v1\n  api_key: \"\"\n",
        )
        .unwrap();
        let config =
            ConfigService::with_config_path(paths.clone(), dir.path().join("config.yml"));

        // Only meaningful when the environment does not supply a key.
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        let result = AppState::initialize_with(paths, config).await;
        assert!(matches!(result, Err(InitializationError::Config(_))));
    }

    #[tokio::test]
    async fn missing_index_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::with_dirs(
            dir.path().join("root"),
            dir.path().join("data"),
        ));
        std::fs::write(
            dir.path().join("config.yml"),
            "llm:\n  api_key: sk-test\nembedding:\n  provider: hashing\n",
        )
        .unwrap();
        let config =
            ConfigService::with_config_path(paths.clone(), dir.path().join("config.yml"));

        let result = AppState::initialize_with(paths, config).await;
        assert!(matches!(result, Err(InitializationError::Index(_))));
    }
}
