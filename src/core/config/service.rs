use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "access_key",
    "bearer",
    "auth_",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "tokens", "tokenizer"];

/// Environment variables that take precedence over the files when set.
const ENV_OVERRIDES: [(&str, &[&str]); 2] = [
    ("OPENAI_API_KEY", &["llm", "api_key"]),
    ("OPENAI_BASE_URL", &["llm", "base_url"]),
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
    config_override: Option<PathBuf>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self {
            paths,
            config_override: None,
        }
    }

    pub fn with_config_path(paths: Arc<AppPaths>, config_path: PathBuf) -> Self {
        Self {
            paths,
            config_override: Some(config_path),
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Some(path) = &self.config_override {
            return path.clone();
        }
        if let Ok(path) = env::var("POKEGPT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Public config merged with secrets, without environment overrides.
    pub fn load_file_config(&self) -> Result<Value, ApiError> {
        let public_config = load_yaml_file(&self.config_path())?;
        let secrets_config = load_yaml_file(&self.secrets_path())?;
        Ok(deep_merge(&public_config, &secrets_config))
    }

    pub fn load_config(&self) -> Result<Value, ApiError> {
        let merged = self.load_file_config()?;
        Ok(apply_env_overrides(&merged, |key| env::var(key).ok()))
    }

    pub fn update_config(&self, config_data: Value, merge: bool) -> Result<(), ApiError> {
        let current = self.load_file_config()?;
        let restored = restore_redacted_values(&config_data, &current);
        let to_save = if merge {
            deep_merge(&current, &restored)
        } else {
            restored
        };

        validate_config(&to_save)?;
        save_config_files(self, &to_save)?;
        Ok(())
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

fn load_yaml_file(path: &Path) -> Result<Value, ApiError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        ApiError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    if contents.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_yaml::from_str::<Value>(&contents) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(_) => Err(ApiError::Config(format!(
            "{} must contain a mapping at the top level",
            path.display()
        ))),
        Err(e) => Err(ApiError::Config(format!(
            "failed to parse {}: {}",
            path.display(),
            e
        ))),
    }
}

fn save_config_files(service: &ConfigService, config: &Value) -> Result<(), ApiError> {
    let (public_config, secrets_config) = split_config(config);

    let config_path = service.config_path();
    if let Some(parent) = config_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let public_yaml = serde_yaml::to_string(&public_config).map_err(ApiError::internal)?;
    fs::write(&config_path, public_yaml).map_err(ApiError::internal)?;

    let secrets_path = service.secrets_path();
    if let Some(parent) = secrets_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let secrets_yaml = serde_yaml::to_string(&secrets_config).map_err(ApiError::internal)?;
    fs::write(&secrets_path, secrets_yaml).map_err(ApiError::internal)?;

    Ok(())
}

pub(crate) fn apply_env_overrides<F>(config: &Value, lookup: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = config.clone();
    for (var, path) in ENV_OVERRIDES {
        let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        set_path(&mut result, path, Value::String(value));
    }
    result
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = root;
    for key in parents {
        let Some(map) = cursor.as_object_mut() else {
            return;
        };
        cursor = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if let Some(map) = cursor.as_object_mut() {
        map.insert(last.to_string(), value);
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn split_config(config: &Value) -> (Value, Value) {
    match config {
        Value::Object(map) => {
            let mut public_map = Map::new();
            let mut secret_map = Map::new();

            for (key, value) in map {
                match value {
                    Value::Object(_) => {
                        let (public_sub, secret_sub) = split_config(value);
                        if !is_empty_object(&public_sub) {
                            public_map.insert(key.clone(), public_sub);
                        }
                        if !is_empty_object(&secret_sub) {
                            secret_map.insert(key.clone(), secret_sub);
                        }
                    }
                    _ => {
                        if is_sensitive_key(key) && !value.is_null() {
                            secret_map.insert(key.clone(), value.clone());
                        } else {
                            public_map.insert(key.clone(), value.clone());
                        }
                    }
                }
            }

            (Value::Object(public_map), Value::Object(secret_map))
        }
        _ => (config.clone(), Value::Object(Map::new())),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn restore_redacted_values(new_value: &Value, original: &Value) -> Value {
    match new_value {
        Value::Object(map) => {
            let mut restored = Map::new();
            let original_map = original.as_object();

            for (key, value) in map {
                let orig_val = original_map.and_then(|m| m.get(key));
                if value.as_str() == Some(REDACT_PLACEHOLDER) {
                    if let Some(orig) = orig_val {
                        restored.insert(key.clone(), orig.clone());
                    }
                    continue;
                }

                if value.is_object() {
                    let merged = restore_redacted_values(value, orig_val.unwrap_or(&Value::Null));
                    restored.insert(key.clone(), merged);
                } else {
                    restored.insert(key.clone(), value.clone());
                }
            }

            Value::Object(restored)
        }
        _ => new_value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}
