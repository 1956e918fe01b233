//! Answer streamer.
//!
//! Drives one completion through the provider for the selected model and
//! forwards canonical events in provider order. Overload failures are retried
//! with exponential backoff as long as nothing from the failed attempt reached
//! the caller; every stream ends with exactly one `Done`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::anthropic::AnthropicProvider;
use super::gemini::GeminiProvider;
use super::openai::OpenAiProvider;
use super::prompt::{build_messages, SYSTEM_PROMPT};
use super::provider::{CompletionProvider, ProviderError};
use super::registry::{ModelSpec, Provider};
use super::types::{ChatMessage, CompletionRequest, StreamEvent};
use crate::core::config::settings::{LlmSettings, ProviderSettings};
use crate::rag::ScoredChunk;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`: base, 2x base, 4x base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl From<&LlmSettings> for RetryPolicy {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.retry_base_delay,
        }
    }
}

enum Attempt {
    Completed,
    Cancelled,
    Failed {
        error: ProviderError,
        forwarded: bool,
    },
}

#[derive(Clone)]
pub struct AnswerStreamer {
    providers: HashMap<Provider, Arc<dyn CompletionProvider>>,
    retry: RetryPolicy,
    temperature: f32,
}

impl AnswerStreamer {
    pub fn new(retry: RetryPolicy, temperature: f32) -> Self {
        Self {
            providers: HashMap::new(),
            retry,
            temperature,
        }
    }

    pub fn from_settings(llm: &LlmSettings, providers: &ProviderSettings) -> Self {
        Self::new(RetryPolicy::from(llm), llm.temperature)
            .with_provider(Arc::new(OpenAiProvider::new(&providers.openai)))
            .with_provider(Arc::new(AnthropicProvider::new(&providers.anthropic)))
            .with_provider(Arc::new(GeminiProvider::new(&providers.google)))
    }

    pub fn with_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    /// Streams an answer to `query` grounded in `context`.
    pub fn stream_answer(
        &self,
        model: &'static ModelSpec,
        query: &str,
        history: Vec<ChatMessage>,
        context: &[ScoredChunk],
    ) -> mpsc::Receiver<StreamEvent> {
        let messages = build_messages(history, query, context);
        let request = model.completion_request(SYSTEM_PROMPT, messages, self.temperature);
        self.stream_request(model, request)
    }

    pub fn stream_request(
        &self,
        model: &'static ModelSpec,
        request: CompletionRequest,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let provider = self.providers.get(&model.provider).cloned();
        let retry = self.retry;

        tokio::spawn(async move {
            let Some(provider) = provider else {
                let _ = tx
                    .send(StreamEvent::Error {
                        error: format!("No {} provider is configured", model.provider.label()),
                    })
                    .await;
                let _ = tx.send(StreamEvent::done()).await;
                return;
            };
            if run_with_retry(provider.as_ref(), model, &request, retry, &tx).await {
                let _ = tx.send(StreamEvent::done()).await;
            }
        });

        rx
    }

    /// Runs a request to completion and returns the concatenated answer text.
    pub async fn complete(
        &self,
        model: &'static ModelSpec,
        system: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, ProviderError> {
        let request = model.completion_request(system, messages, self.temperature);
        let mut rx = self.stream_request(model, request);
        let mut text = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
                StreamEvent::Error { error } => return Err(ProviderError::Upstream(error)),
                StreamEvent::Done { .. } => break,
                _ => {}
            }
        }
        Ok(text)
    }
}

/// Returns false when the receiver went away and no `Done` should follow.
async fn run_with_retry(
    provider: &dyn CompletionProvider,
    model: &ModelSpec,
    request: &CompletionRequest,
    retry: RetryPolicy,
    tx: &mpsc::Sender<StreamEvent>,
) -> bool {
    let mut attempt = 1;
    loop {
        let (error, forwarded) = match forward_attempt(provider, request, tx).await {
            Attempt::Completed => return true,
            Attempt::Cancelled => {
                tracing::debug!("Answer stream for {} cancelled by client", model.name);
                return false;
            }
            Attempt::Failed { error, forwarded } => (error, forwarded),
        };

        let retryable = error.is_retryable() && !forwarded;
        if retryable && attempt < retry.max_attempts {
            let wait = retry.delay_after(attempt);
            tracing::warn!(
                "{} attempt {}/{} overloaded, retrying in {:?}: {}",
                model.name,
                attempt,
                retry.max_attempts,
                wait,
                error
            );
            let info = StreamEvent::Info {
                text: format!("API overloaded. Retrying in {}...", describe_wait(wait)),
            };
            if tx.send(info).await.is_err() {
                return false;
            }
            tokio::time::sleep(wait).await;
            attempt += 1;
            continue;
        }

        let message = if retryable {
            format!(
                "{} API is currently overloaded. Please try again later.",
                model.provider.label()
            )
        } else {
            error.to_string()
        };
        tracing::error!("{} stream failed after {} attempt(s): {}", model.name, attempt, error);
        return tx.send(StreamEvent::Error { error: message }).await.is_ok();
    }
}

async fn forward_attempt(
    provider: &dyn CompletionProvider,
    request: &CompletionRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Attempt {
    let mut rx = match provider.stream(request).await {
        Ok(rx) => rx,
        Err(error) => {
            return Attempt::Failed {
                error,
                forwarded: false,
            }
        }
    };

    let mut forwarded = false;
    loop {
        let item = tokio::select! {
            item = rx.recv() => item,
            _ = tx.closed() => return Attempt::Cancelled,
        };
        let Some(item) = item else {
            break;
        };
        match item {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    return Attempt::Cancelled;
                }
                forwarded = true;
            }
            Err(error) => return Attempt::Failed { error, forwarded },
        }
    }
    Attempt::Completed
}

fn describe_wait(wait: Duration) -> String {
    if wait.subsec_millis() == 0 {
        format!("{} seconds", wait.as_secs())
    } else {
        format!("{} ms", wait.as_millis())
    }
}
