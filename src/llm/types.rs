use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Provider-neutral completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Vendor model id, e.g. `gpt-4o-mini`.
    pub model_id: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Extended-thinking token budget, Anthropic only.
    pub thinking_budget: Option<u32>,
}

/// Image resolved from an answer's markdown placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedImage {
    pub id: String,
    pub image_base64: String,
}

/// Canonical event vocabulary shared by every provider.
///
/// Adapters only produce the block, delta and finish variants. `Info`,
/// `Error` and `Done` are added by the answer streamer, `Clarification` by
/// the chat service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ContentBlockStart {
        block_type: String,
    },
    ThinkingDelta {
        text: String,
    },
    TextDelta {
        text: String,
    },
    ContentBlockStop,
    Info {
        text: String,
    },
    Clarification {
        missing: String,
        questions: Vec<String>,
    },
    Error {
        error: String,
    },
    Finish {
        reason: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ResolvedImage>,
    },
}

impl StreamEvent {
    pub fn text(text: impl Into<String>) -> Self {
        StreamEvent::TextDelta { text: text.into() }
    }

    pub fn done() -> Self {
        StreamEvent::Done { images: Vec::new() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tag() {
        assert_eq!(
            serde_json::to_value(StreamEvent::text("Press power.")).unwrap(),
            json!({ "type": "text_delta", "text": "Press power." })
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::ContentBlockStop).unwrap(),
            json!({ "type": "content_block_stop" })
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::done()).unwrap(),
            json!({ "type": "done" })
        );
    }

    #[test]
    fn done_carries_images_when_present() {
        let done = StreamEvent::Done {
            images: vec![ResolvedImage {
                id: "img-2".to_string(),
                image_base64: "aGk=".to_string(),
            }],
        };
        let value = serde_json::to_value(&done).unwrap();
        assert_eq!(value["images"][0]["id"], "img-2");
        assert!(done.is_terminal());
    }
}
