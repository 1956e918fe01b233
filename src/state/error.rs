use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to open manual store: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Unknown default model: {0}")]
    Model(#[source] anyhow::Error),
}
