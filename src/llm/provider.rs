use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

use super::registry::Provider;
use super::sse::{SseDecoder, SseFrame};
use super::types::{CompletionRequest, StreamEvent};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider overloaded: {0}")]
    Overloaded(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("missing credential: {0}")]
    MissingCredential(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ProviderError {
    /// Only overload is transient enough to retry the whole request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Overloaded(_))
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        if status == 529 || status == 503 || body.to_ascii_lowercase().contains("overloaded") {
            return ProviderError::Overloaded(message);
        }
        match status {
            401 | 403 => ProviderError::Auth(message),
            400 | 404 | 422 => ProviderError::InvalidRequest(message),
            429 => ProviderError::RateLimited(message),
            _ => ProviderError::Upstream(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Upstream(err.to_string())
    }
}

pub type EventStream = mpsc::Receiver<Result<StreamEvent, ProviderError>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Starts one streaming completion. The receiver closes when the vendor
    /// stream ends; a mid-stream failure arrives as a final `Err`.
    async fn stream(&self, request: &CompletionRequest) -> Result<EventStream, ProviderError>;
}

/// What one SSE frame translated into.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    pub events: Vec<StreamEvent>,
    pub finished: bool,
}

impl Step {
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn emit(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            finished: false,
        }
    }

    pub fn finish(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            finished: true,
        }
    }
}

/// Sends the request and returns the response, or the classified error for
/// a non-success status.
pub(crate) async fn send_checked(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let res = request.send().await?;
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, &body))
}

/// Pumps an SSE response body through `translate` on a background task.
pub(crate) fn spawn_sse_pump<F>(response: reqwest::Response, mut translate: F) -> EventStream
where
    F: FnMut(&SseFrame) -> Result<Step, ProviderError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let mut stream = response.bytes_stream();

    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => {
                    for frame in decoder.push(&bytes) {
                        if !forward(&tx, translate(&frame)).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(ProviderError::from(e))).await;
                    return;
                }
            }
        }
        if let Some(frame) = decoder.finish() {
            forward(&tx, translate(&frame)).await;
        }
    });

    rx
}

/// Returns false once the pump should stop.
async fn forward(
    tx: &mpsc::Sender<Result<StreamEvent, ProviderError>>,
    step: Result<Step, ProviderError>,
) -> bool {
    match step {
        Ok(step) => {
            for event in step.events {
                if tx.send(Ok(event)).await.is_err() {
                    return false;
                }
            }
            !step.finished
        }
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ProviderError::from_status(529, "").is_retryable());
        assert!(ProviderError::from_status(503, "busy").is_retryable());
        assert!(ProviderError::from_status(500, r#"{"type":"overloaded_error"}"#).is_retryable());
        assert!(matches!(
            ProviderError::from_status(401, "bad key"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(422, "bad body"),
            ProviderError::InvalidRequest(_)
        ));
        let limited = ProviderError::from_status(429, "slow down");
        assert!(matches!(limited, ProviderError::RateLimited(_)));
        assert!(!limited.is_retryable());
        assert!(matches!(
            ProviderError::from_status(500, "boom"),
            ProviderError::Upstream(_)
        ));
    }
}
