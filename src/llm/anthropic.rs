//! Anthropic Messages API streaming adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::{send_checked, spawn_sse_pump, CompletionProvider, EventStream, ProviderError, Step};
use super::registry::Provider;
use super::sse::SseFrame;
use super::types::{CompletionRequest, StreamEvent};
use crate::core::config::settings::ProviderCredentials;

const API_VERSION: &str = "2023-06-01";
const FALLBACK_MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(credentials: &ProviderCredentials) -> Self {
        Self {
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            client: Client::new(),
        }
    }
}

pub fn build_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": request.model_id,
        "system": request.system,
        "messages": request.messages,
        "max_tokens": request.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
        "stream": true,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(t) = request.temperature {
            obj.insert("temperature".to_string(), json!(t));
        }
        if let Some(budget) = request.thinking_budget {
            obj.insert(
                "thinking".to_string(),
                json!({ "type": "enabled", "budget_tokens": budget }),
            );
        }
    }
    body
}

pub fn translate(frame: &SseFrame) -> Result<Step, ProviderError> {
    let payload: Value = serde_json::from_str(&frame.data)
        .map_err(|e| ProviderError::Malformed(format!("anthropic event: {}", e)))?;
    let kind = payload["type"]
        .as_str()
        .or(frame.event.as_deref())
        .unwrap_or_default();

    let step = match kind {
        "content_block_start" => Step::emit(vec![StreamEvent::ContentBlockStart {
            block_type: payload["content_block"]["type"]
                .as_str()
                .unwrap_or("text")
                .to_string(),
        }]),
        "content_block_delta" => {
            let delta = &payload["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => Step::emit(vec![StreamEvent::TextDelta {
                    text: delta["text"].as_str().unwrap_or_default().to_string(),
                }]),
                Some("thinking_delta") => Step::emit(vec![StreamEvent::ThinkingDelta {
                    text: delta["thinking"].as_str().unwrap_or_default().to_string(),
                }]),
                _ => Step::skip(),
            }
        }
        "content_block_stop" => Step::emit(vec![StreamEvent::ContentBlockStop]),
        "message_delta" => match payload["delta"]["stop_reason"].as_str() {
            Some(reason) => Step::emit(vec![StreamEvent::Finish {
                reason: reason.to_string(),
            }]),
            None => Step::skip(),
        },
        "message_stop" => Step::finish(Vec::new()),
        "error" => return Err(classify_error(&payload["error"])),
        _ => Step::skip(),
    };
    Ok(step)
}

fn classify_error(error: &Value) -> ProviderError {
    let message = error["message"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string();
    match error["type"].as_str() {
        Some("overloaded_error") => ProviderError::Overloaded(message),
        Some("authentication_error") | Some("permission_error") => ProviderError::Auth(message),
        Some("invalid_request_error") | Some("not_found_error") => {
            ProviderError::InvalidRequest(message)
        }
        Some("rate_limit_error") => ProviderError::RateLimited(message),
        _ => ProviderError::Upstream(message),
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<EventStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredential("ANTHROPIC_API_KEY".to_string()))?;

        let url = format!("{}/v1/messages", self.base_url);
        let res = send_checked(
            self.client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", API_VERSION)
                .json(&build_body(request)),
        )
        .await?;

        Ok(spawn_sse_pump(res, translate))
    }
}
