use thiserror::Error;

/// Errors produced while orchestrating a single event through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The embedding step failed.
    #[error("embedding failed: {0}")]
    Embed(#[from] castellan_embedder::EmbedderError),

    /// The neighbour-search step failed.
    #[error("search failed: {0}")]
    Search(#[from] castellan_vectorstore::VectorStoreError),

    /// The analysis call failed.
    #[error("analysis failed: {0}")]
    Analyze(#[from] castellan_llm::LlmError),

    /// The model's response could not be assembled into a `SecurityEvent`.
    #[error("invalid response: {0}")]
    Invalid(#[from] castellan_types::CastellanError),

    /// The model's response text did not parse as the response schema.
    #[error("malformed analysis response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Configuration failed validation.
    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    /// The per-event deadline elapsed before the pipeline finished.
    #[error("event deadline exceeded")]
    DeadlineExceeded,

    /// Processing was cancelled.
    #[error("processing cancelled")]
    Cancelled,
}
