//! OpenAI Chat Completions streaming adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::{send_checked, spawn_sse_pump, CompletionProvider, EventStream, ProviderError, Step};
use super::registry::Provider;
use super::sse::SseFrame;
use super::types::{CompletionRequest, StreamEvent};
use crate::core::config::settings::ProviderCredentials;

#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(credentials: &ProviderCredentials) -> Self {
        Self {
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            client: Client::new(),
        }
    }
}

pub fn build_body(request: &CompletionRequest) -> Value {
    let mut messages = vec![json!({ "role": "system", "content": request.system })];
    messages.extend(
        request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content })),
    );

    let mut body = json!({
        "model": request.model_id,
        "messages": messages,
        "stream": true,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(t) = request.temperature {
            obj.insert("temperature".to_string(), json!(t));
        }
        if let Some(t) = request.max_tokens {
            obj.insert("max_tokens".to_string(), json!(t));
        }
    }
    body
}

pub fn translate(frame: &SseFrame) -> Result<Step, ProviderError> {
    let data = frame.data.trim();
    if data == "[DONE]" {
        return Ok(Step::finish(Vec::new()));
    }

    let payload: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Malformed(format!("openai chunk: {}", e)))?;

    if let Some(error) = payload.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error").to_string();
        return Err(match error["code"].as_str() {
            Some("server_overloaded") | Some("overloaded") => ProviderError::Overloaded(message),
            Some("rate_limit_exceeded") => ProviderError::RateLimited(message),
            _ => ProviderError::Upstream(message),
        });
    }

    let choice = &payload["choices"][0];
    let mut events = Vec::new();
    if let Some(content) = choice["delta"]["content"].as_str() {
        if !content.is_empty() {
            events.push(StreamEvent::text(content));
        }
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        events.push(StreamEvent::Finish {
            reason: reason.to_string(),
        });
    }
    Ok(Step::emit(events))
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<EventStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredential("OPENAI_API_KEY".to_string()))?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let res = send_checked(
            self.client
                .post(&url)
                .bearer_auth(api_key)
                .json(&build_body(request)),
        )
        .await?;

        Ok(spawn_sse_pump(res, translate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::sse::SseDecoder;
    use crate::llm::types::ChatMessage;

    #[test]
    fn recorded_stream_maps_deltas_and_finish() {
        let raw = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"Hold the \"},\"finish_reason\":null}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"button. [Page 4]\"},\"finish_reason\":null}]}\n\n\
data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n\
data: [DONE]\n\n";

        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        let mut finished = false;
        for frame in decoder.push(raw.as_bytes()) {
            let step = translate(&frame).unwrap();
            events.extend(step.events);
            finished = step.finished;
        }

        assert!(finished);
        assert_eq!(
            events,
            vec![
                StreamEvent::text("Hold the "),
                StreamEvent::text("button. [Page 4]"),
                StreamEvent::Finish {
                    reason: "stop".to_string()
                },
            ]
        );
    }

    #[test]
    fn error_payload_is_surfaced() {
        let frame = SseFrame {
            event: None,
            data: r#"{"error":{"message":"quota","code":"rate_limit_exceeded"}}"#.to_string(),
        };
        assert!(matches!(
            translate(&frame).unwrap_err(),
            ProviderError::RateLimited(_)
        ));
    }

    #[test]
    fn body_puts_system_prompt_first() {
        let request = CompletionRequest {
            model_id: "gpt-4o-mini".to_string(),
            system: "Cite pages.".to_string(),
            messages: vec![
                ChatMessage::user("q1"),
                ChatMessage::assistant("a1"),
                ChatMessage::user("q2"),
            ],
            max_tokens: Some(4096),
            temperature: None,
            thinking_budget: None,
        };
        let body = build_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["max_tokens"], 4096);
    }
}
