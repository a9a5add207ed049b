use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use axum::http::HeaderMap;
use uuid::Uuid;

use super::config::AppPaths;
use crate::core::errors::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

const SESSION_TOKEN_ENV: &str = "POKEGPT_SESSION_TOKEN";

/// Per-process secret that local clients present in `x-api-key` to reach the
/// configuration routes.
#[derive(Debug, Clone)]
pub struct SessionToken {
    value: String,
}

impl SessionToken {
    pub fn value(&self) -> &str {
        &self.value
    }
}

pub fn session_token_path(paths: &AppPaths) -> PathBuf {
    paths.user_data_dir.join(".session_token")
}

/// Uses `POKEGPT_SESSION_TOKEN` when set; otherwise generates a fresh token
/// and writes it to `<data_dir>/.session_token` (mode 0600 on Unix).
pub fn init_session_token(paths: &AppPaths) -> SessionToken {
    if let Ok(token) = env::var(SESSION_TOKEN_ENV) {
        if !token.trim().is_empty() {
            return SessionToken { value: token };
        }
    }
    generate_session_token(&session_token_path(paths))
}

fn generate_session_token(token_path: &Path) -> SessionToken {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    if let Some(parent) = token_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(err) = fs::write(token_path, &token) {
        tracing::warn!("Failed to write session token: {}", err);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(token_path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            let _ = fs::set_permissions(token_path, perms);
        }
    }

    SessionToken { value: token }
}

pub fn require_api_key(headers: &HeaderMap, expected: &SessionToken) -> Result<(), ApiError> {
    let header_value = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() || header_value != expected.value() {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}
