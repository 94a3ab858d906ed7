use thiserror::Error;

/// Errors surfaced by a [`crate::VectorStore`] implementation.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Transport-level failure talking to the vector backend.
    #[error("vector store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Construction-time configuration failure.
    #[error("invalid vector store configuration: {0}")]
    Config(String),

    /// Response body could not be parsed as the expected schema.
    #[error("vector store response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
