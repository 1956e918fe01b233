use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::llm::MODELS;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "cached_corpora": state.corpora.len().await,
    }))
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "default": state.settings.llm.default_model,
        "models": MODELS.iter().collect::<Vec<_>>(),
    }))
}
