use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chatbots, config, documents, health};
use crate::server::ws::handler::ws_handler;
use crate::state::AppState;

/// Creates the application router: health and model listing, documents and
/// their corpus, chatbots and their history, SSE ask endpoints, and the
/// WebSocket transport.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/models", get(health::list_models))
        .route("/api/config", get(config::get_config))
        .route(
            "/api/documents",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/api/documents/:document_id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route(
            "/api/documents/:document_id/pages",
            get(documents::list_pages),
        )
        .route(
            "/api/documents/:document_id/corpus",
            post(documents::rebuild_corpus),
        )
        .route(
            "/api/documents/:document_id/ask",
            post(documents::ask_document),
        )
        .route("/api/chatbots", post(chatbots::create_chatbot))
        .route(
            "/api/chatbots/:chatbot_id",
            get(chatbots::get_chatbot).delete(chatbots::delete_chatbot),
        )
        .route(
            "/api/chatbots/:chatbot_id/history",
            get(chatbots::get_history).delete(chatbots::clear_history),
        )
        .route(
            "/api/chatbots/:chatbot_id/document-url",
            get(chatbots::get_document_url),
        )
        .route("/api/chatbots/:chatbot_id/ask", post(chatbots::ask_chatbot))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let mut origins = state.settings.server.cors_allowed_origins.clone();
    if origins.is_empty() {
        origins = default_local_origins();
    }
    let allowed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
