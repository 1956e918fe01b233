//! Google Gemini `streamGenerateContent` adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::{send_checked, spawn_sse_pump, CompletionProvider, EventStream, ProviderError, Step};
use super::registry::Provider;
use super::sse::SseFrame;
use super::types::{CompletionRequest, Role, StreamEvent};
use crate::core::config::settings::ProviderCredentials;

#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl GeminiProvider {
    pub fn new(credentials: &ProviderCredentials) -> Self {
        Self {
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            client: Client::new(),
        }
    }
}

pub fn build_body(request: &CompletionRequest) -> Value {
    let contents: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let mut generation_config = json!({});
    if let Some(obj) = generation_config.as_object_mut() {
        if let Some(t) = request.temperature {
            obj.insert("temperature".to_string(), json!(t));
        }
        if let Some(t) = request.max_tokens {
            obj.insert("maxOutputTokens".to_string(), json!(t));
        }
    }

    json!({
        "systemInstruction": { "parts": [{ "text": request.system }] },
        "contents": contents,
        "generationConfig": generation_config,
    })
}

pub fn translate(frame: &SseFrame) -> Result<Step, ProviderError> {
    let payload: Value = serde_json::from_str(frame.data.trim())
        .map_err(|e| ProviderError::Malformed(format!("gemini chunk: {}", e)))?;

    if let Some(error) = payload.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error").to_string();
        return Err(match error["status"].as_str() {
            Some("UNAVAILABLE") => ProviderError::Overloaded(message),
            Some("RESOURCE_EXHAUSTED") => ProviderError::RateLimited(message),
            Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED") => ProviderError::Auth(message),
            Some("INVALID_ARGUMENT") | Some("NOT_FOUND") => ProviderError::InvalidRequest(message),
            _ => ProviderError::Upstream(message),
        });
    }

    if let Some(reason) = payload["promptFeedback"]["blockReason"].as_str() {
        return Err(ProviderError::Upstream(format!(
            "Gemini blocked the prompt: {}",
            reason
        )));
    }

    let candidate = &payload["candidates"][0];
    let mut events = Vec::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            let Some(text) = part["text"].as_str() else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            if part["thought"].as_bool().unwrap_or(false) {
                events.push(StreamEvent::ThinkingDelta {
                    text: text.to_string(),
                });
            } else {
                events.push(StreamEvent::text(text));
            }
        }
    }

    match candidate["finishReason"].as_str() {
        None | Some("FINISH_REASON_UNSPECIFIED") => {}
        Some(reason @ ("STOP" | "MAX_TOKENS")) => events.push(StreamEvent::Finish {
            reason: reason.to_ascii_lowercase(),
        }),
        Some(reason) => {
            return Err(ProviderError::Upstream(format!(
                "Gemini stopped generation: {}",
                reason
            )))
        }
    }

    Ok(Step::emit(events))
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<EventStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredential("GEMINI_API_KEY".to_string()))?;

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            urlencoding::encode(&request.model_id),
            urlencoding::encode(api_key)
        );
        let res = send_checked(self.client.post(&url).json(&build_body(request))).await?;

        Ok(spawn_sse_pump(res, translate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    fn frame(data: &str) -> SseFrame {
        SseFrame {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn text_and_thought_parts_map_to_deltas() {
        let step = translate(&frame(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Looking at page 3","thought":true},{"text":"Open the lid."}]}}]}"#,
        ))
        .unwrap();
        assert_eq!(
            step.events,
            vec![
                StreamEvent::ThinkingDelta {
                    text: "Looking at page 3".to_string()
                },
                StreamEvent::text("Open the lid."),
            ]
        );
    }

    #[test]
    fn stop_reason_becomes_finish() {
        let step = translate(&frame(
            r#"{"candidates":[{"content":{"parts":[{"text":"Done."}]},"finishReason":"STOP"}]}"#,
        ))
        .unwrap();
        assert_eq!(
            step.events.last(),
            Some(&StreamEvent::Finish {
                reason: "stop".to_string()
            })
        );
        assert!(!step.finished);
    }

    #[test]
    fn safety_stop_is_a_non_retryable_error() {
        let err = translate(&frame(
            r#"{"candidates":[{"content":{"parts":[]},"finishReason":"SAFETY"}]}"#,
        ))
        .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn body_maps_assistant_to_model_role() {
        let request = CompletionRequest {
            model_id: "gemini-1.5-pro".to_string(),
            system: "Cite pages.".to_string(),
            messages: vec![ChatMessage::user("q"), ChatMessage::assistant("a")],
            max_tokens: Some(4096),
            temperature: Some(0.0),
            thinking_budget: None,
        };
        let body = build_body(&request);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Cite pages.");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }
}
