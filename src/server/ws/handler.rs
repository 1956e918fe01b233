use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::protocol::WsIncomingMessage;
use crate::chat::AskTarget;
use crate::core::errors::ApiError;
use crate::llm::StreamEvent;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut incoming) = mpsc::unbounded_channel::<WsIncomingMessage>();

    tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                    Ok(parsed) => {
                        if tx.send(parsed).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::debug!("Ignoring malformed socket frame: {}", err),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    while let Some(message) = incoming.recv().await {
        let kind = message.msg_type.clone().unwrap_or_default();
        let result = match kind.as_str() {
            "ask" => run_turn(&mut sender, &state, message, &mut incoming).await,
            "stop" => send_json(&mut sender, json!({"type": "stopped"})).await,
            other => Err(ApiError::BadRequest(format!("Unknown message type: {}", other))),
        };
        if let Err(err) = result {
            let event = StreamEvent::Error {
                error: err.to_string(),
            };
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    }
}

/// Streams one turn to the socket until it finishes, the client sends
/// `stop`, or the socket closes. Returning drops the event receiver, which
/// stops generation upstream.
async fn run_turn(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
    message: WsIncomingMessage,
    incoming: &mut mpsc::UnboundedReceiver<WsIncomingMessage>,
) -> Result<(), ApiError> {
    let text = message.message.unwrap_or_default();
    let target = match (message.chatbot_id, message.document_id) {
        (Some(chatbot_id), _) => AskTarget::Chatbot(chatbot_id),
        (None, Some(document_id)) => AskTarget::Document {
            document_id,
            history: message.chat_history,
        },
        (None, None) => {
            return Err(ApiError::BadRequest(
                "chatbotId or documentId is required".to_string(),
            ))
        }
    };

    let mut events = state
        .chat
        .ask(target, &text, message.model.as_deref())
        .await?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                send_event(sender, &event).await?;
            }
            control = incoming.recv() => {
                match control {
                    Some(control) if control.msg_type.as_deref() == Some("stop") => {
                        tracing::info!("Turn stopped by client");
                        return send_json(sender, json!({"type": "stopped"})).await;
                    }
                    Some(_) => {
                        let busy = StreamEvent::Error {
                            error: "A turn is already running; send stop first".to_string(),
                        };
                        send_event(sender, &busy).await?;
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &StreamEvent,
) -> Result<(), ApiError> {
    let payload = serde_json::to_value(event).map_err(ApiError::internal)?;
    send_json(sender, payload).await
}

pub async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    payload: Value,
) -> Result<(), ApiError> {
    let text = serde_json::to_string(&payload).map_err(ApiError::internal)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}
