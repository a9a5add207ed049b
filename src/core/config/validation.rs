use serde_json::{Map, Value};

use crate::core::errors::ApiError;
use crate::generator::Language;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_optional_string_field(llm, "llm.base_url", "base_url")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_optional_string_field(llm, "llm.chat_model", "chat_model")?;
        validate_u64_field(
            llm,
            "llm.request_timeout_secs",
            "request_timeout_secs",
            1,
            3_600,
        )?;
        validate_u64_field(llm, "llm.max_attempts", "max_attempts", 1, 5)?;
        validate_bool_field(llm, "llm.require_api_key", "require_api_key")?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        if let Some(provider) = embedding.get("provider") {
            match provider.as_str() {
                Some("openai") | Some("hashing") => {}
                Some(other) => {
                    return Err(ApiError::BadRequest(format!(
                        "Invalid config at 'embedding.provider': unknown provider '{}'",
                        other
                    )))
                }
                None => return Err(config_type_error("embedding.provider", "string")),
            }
        }
        validate_u64_field(embedding, "embedding.dimension", "dimension", 8, 65_536)?;
        validate_u64_field(embedding, "embedding.batch_size", "batch_size", 1, 2_048)?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 100)?;
    }

    if let Some(indexing) = expect_optional_object(root, "indexing")? {
        validate_u64_field(indexing, "indexing.chunk_size", "chunk_size", 1, 100_000)?;
        validate_u64_field(
            indexing,
            "indexing.chunk_overlap",
            "chunk_overlap",
            0,
            99_999,
        )?;
        let size = indexing
            .get("chunk_size")
            .and_then(Value::as_u64)
            .unwrap_or(500);
        let overlap = indexing
            .get("chunk_overlap")
            .and_then(Value::as_u64)
            .unwrap_or(100);
        if overlap >= size {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at 'indexing.chunk_overlap': {} must be smaller than chunk_size {}",
                overlap, size
            )));
        }
        validate_optional_string_field(indexing, "indexing.corpus_dir", "corpus_dir")?;
        validate_optional_string_field(indexing, "indexing.file_extension", "file_extension")?;
        validate_optional_string_field(indexing, "indexing.index_path", "index_path")?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        for key in [
            "classifier_temperature",
            "grounded_temperature",
            "general_temperature",
        ] {
            validate_f64_field(
                generation,
                &format!("generation.{}", key),
                key,
                0.0,
                2.0,
            )?;
        }
        if let Some(language) = generation.get("language") {
            let text = language
                .as_str()
                .ok_or_else(|| config_type_error("generation.language", "string"))?;
            text.parse::<Language>().map_err(|_| {
                ApiError::BadRequest(format!(
                    "Invalid config at 'generation.language': unsupported language '{}'",
                    text
                ))
            })?;
        }
    }

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() && !value.is_null() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_a_complete_config() {
        let config = json!({
            "llm": { "base_url": "https://api.openai.com/v1", "chat_model": "gpt-4o-mini", "max_attempts": 2 },
            "embedding": { "provider": "hashing", "dimension": 384 },
            "retrieval": { "top_k": 5 },
            "indexing": { "chunk_size": 500, "chunk_overlap": 100, "corpus_dir": "pokemon_data" },
            "generation": { "classifier_temperature": 0.0, "grounded_temperature": 0.2, "general_temperature": 0.5, "language": "Türkçe" },
            "server": { "port": 8000, "cors_allowed_origins": ["http://localhost:5173"] }
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let config = json!({ "indexing": { "chunk_size": 100, "chunk_overlap": 100 } });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(validate_config(&json!({ "retrieval": { "top_k": 0 } })).is_err());
        assert!(validate_config(&json!({ "llm": { "max_attempts": 9 } })).is_err());
        assert!(
            validate_config(&json!({ "generation": { "general_temperature": 3.5 } })).is_err()
        );
    }

    #[test]
    fn rejects_unknown_language_and_provider() {
        assert!(validate_config(&json!({ "generation": { "language": "Klingon" } })).is_err());
        assert!(validate_config(&json!({ "embedding": { "provider": "cohere" } })).is_err());
    }

    #[test]
    fn rejects_wrong_section_shape() {
        let err = validate_config(&json!({ "retrieval": 5 })).unwrap_err();
        assert!(err.to_string().contains("expected object"));
    }
}
