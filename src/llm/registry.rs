//! Static table of the chat models the backend can answer with.

use serde::Serialize;

use super::types::{ChatMessage, CompletionRequest};
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    pub fn label(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    pub name: &'static str,
    pub model_id: &'static str,
    pub provider: Provider,
    /// `None` lets the vendor decide (reasoning models).
    pub max_tokens: Option<u32>,
    pub accepts_temperature: bool,
    pub thinking_budget: Option<u32>,
}

const fn chat(name: &'static str, model_id: &'static str, provider: Provider) -> ModelSpec {
    ModelSpec {
        name,
        model_id,
        provider,
        max_tokens: Some(4096),
        accepts_temperature: true,
        thinking_budget: None,
    }
}

const fn reasoning(name: &'static str, model_id: &'static str) -> ModelSpec {
    ModelSpec {
        name,
        model_id,
        provider: Provider::OpenAi,
        max_tokens: None,
        accepts_temperature: false,
        thinking_budget: None,
    }
}

pub static MODELS: [ModelSpec; 18] = [
    chat("GPT_3_5", "gpt-3.5-turbo", Provider::OpenAi),
    chat("GPT_4O_MINI", "gpt-4o-mini", Provider::OpenAi),
    chat("GPT_4O", "gpt-4o", Provider::OpenAi),
    chat("GPT_4", "gpt-4", Provider::OpenAi),
    reasoning("GPT_O1", "o1"),
    reasoning("GPT_O3_MINI", "o3-mini"),
    ModelSpec {
        name: "CLAUDE_3_7_SONNET",
        model_id: "claude-3-7-sonnet-20250219",
        provider: Provider::Anthropic,
        max_tokens: Some(32000),
        accepts_temperature: true,
        thinking_budget: Some(16000),
    },
    chat("CLAUDE_3_5_HAIKU", "claude-3-5-haiku-20241022", Provider::Anthropic),
    chat("CLAUDE_3_5_SONNET", "claude-3-5-sonnet-20241022", Provider::Anthropic),
    chat("CLAUDE_3_HAIKU", "claude-3-haiku-20240307", Provider::Anthropic),
    chat("CLAUDE_3_SONNET", "claude-3-sonnet-20240229", Provider::Anthropic),
    chat("CLAUDE_3_OPUS", "claude-3-opus-20240229", Provider::Anthropic),
    chat("GEMINI_2_5_PRO_EXP_03_25", "gemini-2.5-pro-exp-03-25", Provider::Google),
    chat("GEMINI_2_0_PRO_EXP_02_05", "gemini-2.0-pro-exp-02-05", Provider::Google),
    chat("GEMINI_2_0_FLASH_LITE_001", "gemini-2.0-flash-lite-001", Provider::Google),
    chat("GEMINI_2_0_FLASH_001", "gemini-2.0-flash-001", Provider::Google),
    chat("GEMINI_FLASH_1_5", "gemini-1.5-flash", Provider::Google),
    chat("GEMINI_PRO_1_5", "gemini-1.5-pro", Provider::Google),
];

/// Finds a model by registry name or vendor model id.
pub fn lookup(name: &str) -> Option<&'static ModelSpec> {
    let name = name.trim();
    MODELS
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(name) || m.model_id == name)
}

pub fn resolve(name: &str) -> Result<&'static ModelSpec, ApiError> {
    lookup(name).ok_or_else(|| ApiError::BadRequest(format!("Unknown model: {}", name)))
}

impl ModelSpec {
    pub fn completion_request(
        &self,
        system: &str,
        messages: Vec<ChatMessage>,
        temperature: f32,
    ) -> CompletionRequest {
        // extended thinking only runs at temperature 1.0
        let temperature = if self.thinking_budget.is_some() {
            Some(1.0)
        } else if self.accepts_temperature {
            Some(temperature)
        } else {
            None
        };

        CompletionRequest {
            model_id: self.model_id.to_string(),
            system: system.to_string(),
            messages,
            max_tokens: self.max_tokens,
            temperature,
            thinking_budget: self.thinking_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_accepts_registry_name_or_vendor_id() {
        assert_eq!(lookup("GPT_4O_MINI").unwrap().model_id, "gpt-4o-mini");
        assert_eq!(lookup("gemini-1.5-pro").unwrap().name, "GEMINI_PRO_1_5");
        assert!(lookup("command-r-plus").is_none());
        assert!(matches!(resolve("nope"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = MODELS.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MODELS.len());
    }

    #[test]
    fn thinking_model_forces_unit_temperature() {
        let spec = resolve("CLAUDE_3_7_SONNET").unwrap();
        let request = spec.completion_request("sys", vec![ChatMessage::user("hi")], 0.0);
        assert_eq!(request.temperature, Some(1.0));
        assert_eq!(request.max_tokens, Some(32000));
        assert_eq!(request.thinking_budget, Some(16000));
    }

    #[test]
    fn reasoning_models_omit_temperature_and_token_cap() {
        let request = resolve("o1")
            .unwrap()
            .completion_request("sys", Vec::new(), 0.3);
        assert_eq!(request.temperature, None);
        assert_eq!(request.max_tokens, None);
    }
}
