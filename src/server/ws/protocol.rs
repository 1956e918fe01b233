use serde::Deserialize;

use crate::llm::ChatMessage;

/// Client frames: `{"type":"ask", ...}` starts a turn, `{"type":"stop"}`
/// cancels the running one.
#[derive(Debug, Deserialize, Default)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    #[serde(rename = "chatbotId")]
    pub chatbot_id: Option<String>,
    #[serde(rename = "documentId")]
    pub document_id: Option<String>,
    pub message: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "chatHistory", default)]
    pub chat_history: Vec<ChatMessage>,
}
