use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::stream::sse_response;
use crate::chat::AskTarget;
use crate::core::errors::ApiError;
use crate::state::AppState;
use crate::store::Chatbot;

#[derive(Debug, Deserialize)]
pub struct CreateChatbotRequest {
    pub document_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AskChatbotRequest {
    pub message: String,
    pub model: Option<String>,
}

async fn find_chatbot(state: &AppState, chatbot_id: &str) -> Result<Chatbot, ApiError> {
    state
        .store
        .get_chatbot(chatbot_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Chatbot {} not found", chatbot_id)))
}

pub async fn create_chatbot(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateChatbotRequest>,
) -> Result<Json<Value>, ApiError> {
    let chatbot = state.store.create_chatbot(&payload.document_id).await?;
    tracing::info!("Created chatbot {} for document {}", chatbot.id, chatbot.document_id);
    Ok(Json(json!({ "chatbot": chatbot })))
}

pub async fn get_chatbot(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chatbot = find_chatbot(&state, &chatbot_id).await?;
    Ok(Json(json!({ "chatbot": chatbot })))
}

pub async fn delete_chatbot(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_chatbot(&chatbot_id).await? {
        return Err(ApiError::NotFound(format!("Chatbot {} not found", chatbot_id)));
    }
    Ok(Json(json!({ "deleted": chatbot_id })))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chatbot = find_chatbot(&state, &chatbot_id).await?;
    Ok(Json(json!({ "chatbot_id": chatbot.id, "history": chatbot.history })))
}

pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    find_chatbot(&state, &chatbot_id).await?;
    let removed = state.store.clear_history(&chatbot_id).await?;
    Ok(Json(json!({ "chatbot_id": chatbot_id, "removed": removed })))
}

/// Source PDF of the document a chatbot answers from.
pub async fn get_document_url(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chatbot = find_chatbot(&state, &chatbot_id).await?;
    let document = state
        .store
        .get_document(&chatbot.document_id)
        .await?
        .ok_or_else(|| {
            ApiError::Consistency(format!(
                "Document {} referenced by chatbot {} no longer exists",
                chatbot.document_id, chatbot.id
            ))
        })?;
    Ok(Json(json!({ "document_id": document.id, "pdf_url": document.source_url })))
}

pub async fn ask_chatbot(
    State(state): State<Arc<AppState>>,
    Path(chatbot_id): Path<String>,
    Json(payload): Json<AskChatbotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .chat
        .ask(
            AskTarget::Chatbot(chatbot_id),
            &payload.message,
            payload.model.as_deref(),
        )
        .await?;
    Ok(sse_response(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handlers::test_support::test_state;
    use crate::store::HistoryItem;

    async fn chatbot_with_history(state: &Arc<AppState>) -> (String, String) {
        let outcome = state.ingest.ingest("https://example.com/manual.pdf").await.unwrap();
        let Json(created) = create_chatbot(
            State(state.clone()),
            Json(CreateChatbotRequest {
                document_id: outcome.document_id.clone(),
            }),
        )
        .await
        .unwrap();
        let chatbot_id = created["chatbot"]["id"].as_str().unwrap().to_string();
        state
            .store
            .append_history(&chatbot_id, &HistoryItem::now("q", "a"))
            .await
            .unwrap();
        (chatbot_id, outcome.document_id)
    }

    #[tokio::test]
    async fn history_can_be_read_and_cleared() {
        let (state, _dir) = test_state().await;
        let (chatbot_id, _) = chatbot_with_history(&state).await;

        let Json(history) = get_history(State(state.clone()), Path(chatbot_id.clone()))
            .await
            .unwrap();
        assert_eq!(history["history"].as_array().unwrap().len(), 1);

        let Json(cleared) = clear_history(State(state.clone()), Path(chatbot_id.clone()))
            .await
            .unwrap();
        assert_eq!(cleared["removed"], 1);
        let chatbot = find_chatbot(&state, &chatbot_id).await.unwrap();
        assert!(chatbot.history.is_empty());
    }

    #[tokio::test]
    async fn document_url_follows_the_chatbot() {
        let (state, _dir) = test_state().await;
        let (chatbot_id, document_id) = chatbot_with_history(&state).await;

        let Json(body) = get_document_url(State(state.clone()), Path(chatbot_id.clone()))
            .await
            .unwrap();
        assert_eq!(body["pdf_url"], "https://example.com/manual.pdf");

        state.store.delete_document(&document_id).await.unwrap();
        let orphaned = get_document_url(State(state), Path(chatbot_id)).await;
        assert!(matches!(orphaned, Err(ApiError::Consistency(_))));
    }

    #[tokio::test]
    async fn unknown_chatbot_is_not_found() {
        let (state, _dir) = test_state().await;
        assert!(matches!(
            get_chatbot(State(state.clone()), Path("nope".to_string())).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            delete_chatbot(State(state.clone()), Path("nope".to_string())).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            create_chatbot(
                State(state),
                Json(CreateChatbotRequest {
                    document_id: "nope".to_string()
                })
            )
            .await,
            Err(ApiError::NotFound(_))
        ));
    }
}
