use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::stream::sse_response;
use crate::chat::AskTarget;
use crate::core::errors::ApiError;
use crate::llm::ChatMessage;
use crate::state::AppState;
use crate::store::Document;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub pdf_url: String,
}

#[derive(Debug, Deserialize)]
pub struct AskDocumentRequest {
    pub message: String,
    pub model: Option<String>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

async fn find_document(state: &AppState, document_id: &str) -> Result<Document, ApiError> {
    state
        .store
        .get_document(document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", document_id)))
}

pub async fn create_document(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.ingest.ingest(&payload.pdf_url).await?;
    Ok(Json(json!(outcome)))
}

pub async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let documents = state.store.list_documents().await?;
    Ok(Json(json!({ "documents": documents })))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let document = find_document(&state, &document_id).await?;
    let chatbots = state.store.list_chatbots_for_document(&document_id).await?;
    let chatbot_ids: Vec<String> = chatbots.into_iter().map(|c| c.id).collect();
    Ok(Json(json!({ "document": document, "chatbots": chatbot_ids })))
}

/// Removes the document, its pages and its corpus files. Chatbots bound to
/// it stay and will report a consistency error when asked.
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_document(&document_id).await? {
        return Err(ApiError::NotFound(format!("Document {} not found", document_id)));
    }
    state.corpora.evict(&document_id).await;

    let corpus_dir = state.paths.document_corpus_dir(&document_id);
    match tokio::fs::remove_dir_all(&corpus_dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!("Failed to remove corpus {}: {}", corpus_dir.display(), err),
    }

    tracing::info!("Deleted document {}", document_id);
    Ok(Json(json!({ "deleted": document_id })))
}

pub async fn list_pages(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    find_document(&state, &document_id).await?;
    let pages = state.store.list_pages(&document_id).await?;
    Ok(Json(json!({ "pages": pages })))
}

pub async fn rebuild_corpus(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let files = state.ingest.rebuild_corpus(&document_id).await?;
    Ok(Json(json!({ "document_id": document_id, "corpus": files })))
}

pub async fn ask_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Json(payload): Json<AskDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = AskTarget::Document {
        document_id,
        history: payload.chat_history,
    };
    let events = state
        .chat
        .ask(target, &payload.message, payload.model.as_deref())
        .await?;
    Ok(sse_response(events))
}
