use serde_json::{json, Value};

pub const DEFAULT_SPLIT_COUNT: usize = 3;
pub const DEFAULT_OVERLAP: usize = 10;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_EMBEDDING_MODEL: &str = "embed-multilingual-v3.0";
pub const DEFAULT_EMBEDDING_BATCH: usize = 96;
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.cohere.com";
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";
pub const DEFAULT_OCR_BASE_URL: &str = "https://api.mistral.ai";
pub const DEFAULT_CHAT_MODEL: &str = "CLAUDE_3_7_SONNET";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

/// Environment variables consulted when a credential is absent from the
/// merged config, as `(section path, variable)`.
pub const CREDENTIAL_ENV_FALLBACKS: [(&[&str], &str); 5] = [
    (&["providers", "openai"], "OPENAI_API_KEY"),
    (&["providers", "anthropic"], "ANTHROPIC_API_KEY"),
    (&["providers", "google"], "GEMINI_API_KEY"),
    (&["embedding"], "COHERE_API_KEY"),
    (&["ocr"], "MISTRAL_API_KEY"),
];

/// Baseline config every loaded file is merged over.
pub fn default_config() -> Value {
    json!({
        "server": {
            "host": DEFAULT_HOST,
            "port": DEFAULT_PORT,
            "cors_allowed_origins": [
                "http://localhost:3000",
                "http://127.0.0.1:3000"
            ]
        },
        "rag": {
            "split_count": DEFAULT_SPLIT_COUNT,
            "overlap": DEFAULT_OVERLAP,
            "top_k": DEFAULT_TOP_K
        },
        "embedding": {
            "model": DEFAULT_EMBEDDING_MODEL,
            "batch_size": DEFAULT_EMBEDDING_BATCH,
            "base_url": DEFAULT_EMBEDDING_BASE_URL
        },
        "ocr": {
            "model": DEFAULT_OCR_MODEL,
            "base_url": DEFAULT_OCR_BASE_URL
        },
        "llm": {
            "default_model": DEFAULT_CHAT_MODEL,
            "temperature": 0.0,
            "max_attempts": DEFAULT_MAX_ATTEMPTS,
            "retry_base_delay_ms": DEFAULT_RETRY_BASE_DELAY_MS,
            "clarify_first": false
        },
        "providers": {
            "openai": { "base_url": "https://api.openai.com" },
            "anthropic": { "base_url": "https://api.anthropic.com" },
            "google": { "base_url": "https://generativelanguage.googleapis.com" }
        }
    })
}
