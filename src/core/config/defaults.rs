//! Default values for every recognized configuration option.

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

pub const DEFAULT_HASHING_DIMENSION: usize = 384;
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 64;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_FILE_EXTENSION: &str = "txt";

pub const DEFAULT_CLASSIFIER_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_GROUNDED_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_GENERAL_TEMPERATURE: f32 = 0.5;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

pub fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://localhost:8501".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
        "http://127.0.0.1:8501".to_string(),
    ]
}
