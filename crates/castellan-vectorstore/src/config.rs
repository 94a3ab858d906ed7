use crate::error::VectorStoreError;

/// Distance metric used by the vector backend collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DistanceMetric {
    /// Cosine similarity.
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Dot product.
    Dot,
}

/// Typed configuration for a [`crate::VectorStore`] implementation.
///
/// Changes to `dimension` require a fresh collection (a dimension change always requires a fresh collection);
/// this is enforced by the caller re-running `ensure_collection` against a
/// newly named collection, not by this type.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VectorStoreConfig {
    /// Backend REST base URL.
    pub endpoint: String,
    /// Collection name.
    pub collection: String,
    /// Embedding dimension.
    pub dimension: usize,
    /// Distance metric.
    pub distance: DistanceMetric,
}

impl VectorStoreConfig {
    /// Validate bounds; fails fast at startup on misconfiguration.
    pub fn validate(&self) -> Result<(), VectorStoreError> {
        if self.endpoint.is_empty() {
            return Err(VectorStoreError::Config("endpoint must not be empty".into()));
        }
        if self.collection.is_empty() {
            return Err(VectorStoreError::Config("collection must not be empty".into()));
        }
        if self.dimension == 0 {
            return Err(VectorStoreError::Config("dimension must be > 0".into()));
        }
        Ok(())
    }
}
