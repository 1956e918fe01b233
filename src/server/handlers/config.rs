use axum::extract::State;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;

use crate::core::errors::ApiError;
use crate::state::AppState;

/// Effective configuration with credentials masked.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let config = state.config.load_config()?;
    Ok(Json(state.config.redact_sensitive_values(&config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::handlers::test_support::test_state;

    #[tokio::test]
    async fn credentials_are_masked() {
        let (state, dir) = test_state().await;
        std::fs::write(
            dir.path().join("secrets.yaml"),
            "providers:\n  anthropic:\n    api_key: sk-ant-secret\n",
        )
        .unwrap();

        let Json(body) = get_config(State(state)).await.unwrap();
        assert_eq!(body["providers"]["anthropic"]["api_key"], "****");
        assert_eq!(body["rag"]["top_k"], 5);
    }
}
