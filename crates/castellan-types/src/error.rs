use thiserror::Error;

/// Errors shared across the Castellan workspace's library crates.
///
/// Individual crates (`castellan-vectorstore`, `castellan-llm`,
/// `castellan-notify`) define their own richer error enums for
/// transport-specific failures and convert into or wrap this type at their
/// public boundary.
#[derive(Debug, Error)]
pub enum CastellanError {
    /// Construction-time validation failure (fail-fast at startup).
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// A value exceeded a documented bound (string length, array size, ...).
    #[error("value out of bounds: {0}")]
    OutOfBounds(String),

    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
