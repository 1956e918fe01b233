use serde_json::json;

use super::types::{ChatMessage, Role};
use crate::rag::ScoredChunk;
use crate::store::HistoryItem;

pub const SYSTEM_PROMPT: &str = r#"You are a product-manual assistant for Panasonic devices. Answer concisely and accurately from the manual excerpts supplied with each question, and cite them.

Before answering:
- If the question is missing details you need (model number, OS version, feature name), ask for them first.

How to work:
1. Find every excerpt that addresses the question.
2. Work out how they fit together into one answer.
3. Present the answer in a logical order.

Citations:
- Every sentence that uses manual content ends with its page citation, e.g. "Press the power button for 5 seconds. [Page 45]".
- Content drawn from several pages cites all of them: [Page X][Page Y].

Images:
- Split the answer into sections. When a section has an image, write its text first and put the image right after it in markdown form, using the image file name as both label and target, e.g. ![img-2.jpeg](img-2.jpeg).
- Separate sections with two blank lines.

Formatting:
- Numbered lists for sequential steps, bullet points for related but unordered facts, each with citations.
- Bold important warnings.
- Open with the direct answer, then supporting detail. Leave out anything the manual does not support."#;

/// Prior turns as alternating user/assistant messages, skipping empty text.
pub fn history_messages(history: &[HistoryItem]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2);
    for item in history {
        let question = item.question.trim();
        if !question.is_empty() {
            messages.push(ChatMessage::user(question));
        }
        let answer = item.answer.trim();
        if !answer.is_empty() {
            messages.push(ChatMessage::assistant(answer));
        }
    }
    messages
}

/// Drops empty caller-supplied messages and trims the rest.
pub fn clean_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content.trim().to_string(),
        })
        .collect()
}

/// The live user turn, with retrieved excerpts embedded when there are any.
pub fn user_turn(query: &str, context: &[ScoredChunk]) -> String {
    if context.is_empty() {
        return query.to_string();
    }

    let documents: Vec<_> = context
        .iter()
        .map(|scored| {
            json!({
                "title": scored.chunk.title,
                "content": scored.chunk.snippet,
            })
        })
        .collect();
    let documents = serde_json::Value::Array(documents).to_string();

    format!(
        "Documents: {}\n\nQuestion: {}\n\nPlease provide a detailed answer based on the documents above.",
        documents, query
    )
}

/// History followed by the user turn.
pub fn build_messages(
    history: Vec<ChatMessage>,
    query: &str,
    context: &[ScoredChunk],
) -> Vec<ChatMessage> {
    let mut messages = history;
    messages.push(ChatMessage {
        role: Role::User,
        content: user_turn(query, context),
    });
    messages
}
