use thiserror::Error;

/// Errors surfaced by the base client's transport layer. Decorators above
/// the base client fold these into an empty-string result rather than
/// propagating them: the pipeline must stay non-blocking on upstream
/// failure.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Non-success HTTP status from the underlying transport.
    #[error("llm transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Construction-time configuration failure.
    #[error("invalid llm client configuration: {0}")]
    Config(String),

    /// The caller-supplied cancellation signal fired mid-request.
    #[error("llm request cancelled")]
    Cancelled,
}
