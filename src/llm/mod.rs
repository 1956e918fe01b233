//! Chat-completion providers, the model registry, and answer streaming.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod sse;
pub mod streamer;
pub mod types;

pub use provider::{CompletionProvider, EventStream, ProviderError};
pub use registry::{lookup, resolve, ModelSpec, Provider, MODELS};
pub use streamer::{AnswerStreamer, RetryPolicy};
pub use types::{ChatMessage, CompletionRequest, ResolvedImage, Role, StreamEvent};
