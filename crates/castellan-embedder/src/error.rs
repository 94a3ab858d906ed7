use thiserror::Error;

/// Errors surfaced by an [`crate::Embedder`] implementation.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// Non-success HTTP status from the model endpoint.
    #[error("embedding transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The caller-supplied cancellation signal fired mid-request.
    #[error("embedding request cancelled")]
    Cancelled,

    /// Construction-time configuration failure.
    #[error("invalid embedder configuration: {0}")]
    Config(String),
}
