//! Typed view over the merged configuration document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::defaults::*;
use super::paths::AppPaths;
use super::service::ConfigService;
use super::validation::validate_config;
use crate::core::errors::ApiError;
use crate::generator::Language;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub indexing: IndexingSettings,
    pub generation: GenerationSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub request_timeout_secs: u64,
    /// Upper bound on attempts for transport failures, first try included.
    pub max_attempts: u32,
    /// Local OpenAI-compatible servers usually run without a key.
    pub require_api_key: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            require_api_key: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    /// Only meaningful for the hashing embedder; remote models fix their own size.
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::OpenAi,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_HASHING_DIMENSION,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub corpus_dir: Option<String>,
    pub file_extension: String,
    pub index_path: Option<String>,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            corpus_dir: None,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            index_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub classifier_temperature: f32,
    pub grounded_temperature: f32,
    pub general_temperature: f32,
    pub language: Language,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            classifier_temperature: DEFAULT_CLASSIFIER_TEMPERATURE,
            grounded_temperature: DEFAULT_GROUNDED_TEMPERATURE,
            general_temperature: DEFAULT_GENERAL_TEMPERATURE,
            language: Language::English,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl RagSettings {
    pub fn load(config: &ConfigService) -> Result<Self, ApiError> {
        let value = config.load_config()?;
        Self::from_value(&value)
    }

    /// Validates, deserializes and checks the options required before serving.
    pub fn from_value(value: &Value) -> Result<Self, ApiError> {
        validate_config(value).map_err(|e| ApiError::Config(e.to_string()))?;
        let settings: RagSettings = serde_json::from_value(value.clone())
            .map_err(|e| ApiError::Config(format!("invalid configuration: {}", e)))?;
        settings.check_required()?;
        Ok(settings)
    }

    fn check_required(&self) -> Result<(), ApiError> {
        if self.llm.chat_model.trim().is_empty() {
            return Err(ApiError::Config(
                "llm.chat_model must name a generation model".to_string(),
            ));
        }
        if self.embedding.provider == EmbeddingProviderKind::OpenAi
            && self.embedding.model.trim().is_empty()
        {
            return Err(ApiError::Config(
                "embedding.model must name an embedding model".to_string(),
            ));
        }
        if self.llm.require_api_key && self.api_key().is_none() {
            return Err(ApiError::Config(
                "OPENAI_API_KEY not found; add llm.api_key to secrets.yaml or set the environment variable"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.llm
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn corpus_dir(&self, paths: &AppPaths) -> PathBuf {
        match &self.indexing.corpus_dir {
            Some(dir) => resolve_against(&paths.project_root, dir),
            None => paths.corpus_dir.clone(),
        }
    }

    pub fn index_path(&self, paths: &AppPaths) -> PathBuf {
        match &self.indexing.index_path {
            Some(path) => resolve_against(&paths.user_data_dir, path),
            None => paths.index_path.clone(),
        }
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        if self.server.cors_allowed_origins.is_empty() {
            return default_local_origins();
        }
        self.server.cors_allowed_origins.clone()
    }
}

fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let settings = RagSettings::from_value(&json!({ "llm": { "api_key": "sk-test" } })).unwrap();

        assert_eq!(settings.retrieval.top_k, 5);
        assert_eq!(settings.indexing.chunk_size, 500);
        assert_eq!(settings.indexing.chunk_overlap, 100);
        assert_eq!(settings.generation.classifier_temperature, 0.0);
        assert_eq!(settings.generation.grounded_temperature, 0.2);
        assert_eq!(settings.generation.general_temperature, 0.5);
        assert_eq!(settings.generation.language, Language::English);
        assert_eq!(settings.llm.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn missing_credential_is_a_config_error() {
        let err = RagSettings::from_value(&json!({})).unwrap_err();
        assert!(matches!(err, ApiError::Config(ref msg) if msg.contains("OPENAI_API_KEY")));
    }

    #[test]
    fn credential_can_be_waived_for_local_backends() {
        let settings = RagSettings::from_value(&json!({
            "llm": { "require_api_key": false, "base_url": "http://127.0.0.1:1234/v1" },
            "embedding": { "provider": "hashing", "dimension": 64 }
        }))
        .unwrap();
        assert!(settings.api_key().is_none());
        assert_eq!(settings.embedding.provider, EmbeddingProviderKind::Hashing);
    }

    #[test]
    fn empty_model_identifier_is_a_config_error() {
        let err = RagSettings::from_value(&json!({
            "llm": { "api_key": "sk-test", "chat_model": "  " }
        }))
        .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn invalid_ranges_surface_as_config_errors() {
        let err = RagSettings::from_value(&json!({
            "llm": { "api_key": "sk-test" },
            "indexing": { "chunk_size": 50, "chunk_overlap": 80 }
        }))
        .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn relative_paths_resolve_against_roots() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_dirs(dir.path().join("root"), dir.path().join("data"));
        let settings = RagSettings::from_value(&json!({
            "llm": { "api_key": "sk-test" },
            "indexing": { "corpus_dir": "wiki", "index_path": "idx/pokemon.db" }
        }))
        .unwrap();

        assert_eq!(settings.corpus_dir(&paths), dir.path().join("root").join("wiki"));
        assert_eq!(
            settings.index_path(&paths),
            dir.path().join("data").join("idx/pokemon.db")
        );
    }
}
