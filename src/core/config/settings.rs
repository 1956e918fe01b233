use std::time::Duration;

use serde_json::Value;

use super::defaults::*;

/// Typed view over the merged config. Missing keys fall back to defaults.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub server: ServerSettings,
    pub rag: RagSettings,
    pub embedding: EmbeddingSettings,
    pub ocr: OcrSettings,
    pub llm: LlmSettings,
    pub providers: ProviderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub split_count: usize,
    pub overlap: usize,
    pub top_k: usize,
    pub page_image_base: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub model: String,
    pub batch_size: usize,
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub default_model: String,
    pub temperature: f32,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub clarify_first: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai: ProviderCredentials,
    pub anthropic: ProviderCredentials,
    pub google: ProviderCredentials,
}

impl PipelineSettings {
    pub fn from_config(config: &Value) -> Self {
        let section = |name: &str| config.get(name).cloned().unwrap_or(Value::Null);
        let server = section("server");
        let rag = section("rag");
        let embedding = section("embedding");
        let ocr = section("ocr");
        let llm = section("llm");
        let providers = section("providers");

        let provider = |name: &str, fallback: &str| {
            let entry = providers.get(name).cloned().unwrap_or(Value::Null);
            ProviderCredentials {
                api_key: opt_string(&entry, "api_key"),
                base_url: string_or(&entry, "base_url", fallback),
            }
        };

        PipelineSettings {
            server: ServerSettings {
                host: string_or(&server, "host", DEFAULT_HOST),
                port: u64_or(&server, "port", DEFAULT_PORT as u64) as u16,
                cors_allowed_origins: server
                    .get("cors_allowed_origins")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            rag: RagSettings {
                split_count: u64_or(&rag, "split_count", DEFAULT_SPLIT_COUNT as u64) as usize,
                overlap: u64_or(&rag, "overlap", DEFAULT_OVERLAP as u64) as usize,
                top_k: u64_or(&rag, "top_k", DEFAULT_TOP_K as u64) as usize,
                page_image_base: opt_string(&rag, "page_image_base"),
            },
            embedding: EmbeddingSettings {
                model: string_or(&embedding, "model", DEFAULT_EMBEDDING_MODEL),
                batch_size: u64_or(&embedding, "batch_size", DEFAULT_EMBEDDING_BATCH as u64)
                    as usize,
                base_url: string_or(&embedding, "base_url", DEFAULT_EMBEDDING_BASE_URL),
                api_key: opt_string(&embedding, "api_key"),
            },
            ocr: OcrSettings {
                model: string_or(&ocr, "model", DEFAULT_OCR_MODEL),
                base_url: string_or(&ocr, "base_url", DEFAULT_OCR_BASE_URL),
                api_key: opt_string(&ocr, "api_key"),
            },
            llm: LlmSettings {
                default_model: string_or(&llm, "default_model", DEFAULT_CHAT_MODEL),
                temperature: llm
                    .get("temperature")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0) as f32,
                max_attempts: u64_or(&llm, "max_attempts", DEFAULT_MAX_ATTEMPTS as u64) as u32,
                retry_base_delay: Duration::from_millis(u64_or(
                    &llm,
                    "retry_base_delay_ms",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                )),
                clarify_first: llm
                    .get("clarify_first")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
            providers: ProviderSettings {
                openai: provider("openai", "https://api.openai.com"),
                anthropic: provider("anthropic", "https://api.anthropic.com"),
                google: provider("google", "https://generativelanguage.googleapis.com"),
            },
        }
    }
}

fn string_or(section: &Value, key: &str, fallback: &str) -> String {
    opt_string(section, key).unwrap_or_else(|| fallback.to_string())
}

fn opt_string(section: &Value, key: &str) -> Option<String> {
    section
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn u64_or(section: &Value, key: &str, fallback: u64) -> u64 {
    section.get(key).and_then(|v| v.as_u64()).unwrap_or(fallback)
}
