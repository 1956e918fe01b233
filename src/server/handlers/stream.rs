use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;

use crate::llm::StreamEvent;

/// Serves canonical events as server-sent events, one JSON object per
/// `data:` line. Dropping the response drops the receiver, which stops the turn.
pub fn sse_response(
    events: mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((Ok(to_sse_event(&event)), events))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &StreamEvent) -> Event {
    match Event::default().json_data(event) {
        Ok(sse) => sse,
        Err(err) => {
            tracing::error!("Failed to encode stream event: {}", err);
            Event::default().data(r#"{"type":"error","error":"event encoding failed"}"#)
        }
    }
}

