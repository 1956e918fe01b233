//! Chat turns over a document's corpus.

pub mod clarify;
pub mod images;
pub mod service;

pub use clarify::QueryAssessment;
pub use images::resolve_images;
pub use service::{AskTarget, ChatService};
