use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.split_count", "split_count", 1, 64)?;
        validate_u64_field(rag, "rag.overlap", "overlap", 0, 10_000)?;
        validate_u64_field(rag, "rag.top_k", "top_k", 1, 1_000)?;
        validate_optional_string_field(rag, "rag.page_image_base", "page_image_base")?;
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.batch_size", "batch_size", 1, 96)?;
        validate_optional_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_optional_string_field(embedding, "embedding.api_key", "api_key")?;
    }

    if let Some(ocr) = expect_optional_object(root, "ocr")? {
        validate_optional_string_field(ocr, "ocr.model", "model")?;
        validate_optional_string_field(ocr, "ocr.base_url", "base_url")?;
        validate_optional_string_field(ocr, "ocr.api_key", "api_key")?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_optional_string_field(llm, "llm.default_model", "default_model")?;
        validate_f64_field(llm, "llm.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(llm, "llm.max_attempts", "max_attempts", 1, 10)?;
        validate_u64_field(
            llm,
            "llm.retry_base_delay_ms",
            "retry_base_delay_ms",
            0,
            60_000,
        )?;
        validate_bool_field(llm, "llm.clarify_first", "clarify_first")?;
    }

    if let Some(providers) = expect_optional_object(root, "providers")? {
        for (provider, value) in providers {
            let path_prefix = format!("providers.{}", provider);
            let entry = value
                .as_object()
                .ok_or_else(|| config_type_error(&path_prefix, "object"))?;
            validate_optional_string_field(
                entry,
                &format!("{}.api_key", path_prefix),
                "api_key",
            )?;
            validate_optional_string_field(
                entry,
                &format!("{}.base_url", path_prefix),
                "base_url",
            )?;
        }
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
        return Err(out_of_range(path, min, max));
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
        return Err(out_of_range(path, min, max));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "string")),
    }
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

fn out_of_range<T: std::fmt::Display>(path: &str, min: T, max: T) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': must be between {} and {}",
        path, min, max
    ))
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
    use crate::core::config::defaults::default_config;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&default_config()).is_ok());
    }

    #[test]
    fn embedding_batch_above_upstream_cap_is_rejected() {
        let config = json!({ "embedding": { "batch_size": 200 } });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("embedding.batch_size"));
    }

    #[test]
    fn provider_entries_must_be_objects() {
        let config = json!({ "providers": { "openai": "sk-123" } });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("providers.openai"));
    }

    #[test]
    fn temperature_must_be_numeric() {
        let config = json!({ "llm": { "temperature": "warm" } });
        assert!(validate_config(&config).is_err());
    }
}
