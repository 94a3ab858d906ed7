#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-vectorstore** – durable nearest-neighbour index over
//! [`VectorPoint`]s, plus [`HybridRetriever`], a decorator that re-ranks
//! results by a weighted blend of vector similarity and metadata signals.

mod config;
mod error;
mod hybrid;
mod rest;

pub use config::{DistanceMetric, VectorStoreConfig};
pub use error::VectorStoreError;
pub use hybrid::{HybridConfig, HybridRetriever, HybridStats};
pub use rest::RestVectorStore;

use async_trait::async_trait;
use castellan_types::{Embedding, VectorPoint};

/// A single k-NN search result: the stored point and its similarity score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched point.
    pub point: VectorPoint,
    /// Similarity score in the backend's native scale (higher is closer).
    pub score: f64,
}

/// Durable nearest-neighbour index keyed by event fingerprint/unique id.
///
/// All operations are designed to never throw on empty input or absent
/// state: failures are logged by the caller and degrade gracefully rather
/// than stopping ingestion.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotently ensure the configured collection exists. A 409/conflict
    /// response from the backend is treated as success.
    async fn ensure_collection(&self) -> Result<(), VectorStoreError>;

    /// Insert or update a single point.
    async fn upsert(&self, point: VectorPoint) -> Result<(), VectorStoreError>;

    /// Insert or update many points atomically at the record level: a
    /// partial failure must not leave half-indexed points. An empty batch
    /// is a no-op.
    async fn batch_upsert(&self, points: Vec<VectorPoint>) -> Result<(), VectorStoreError>;

    /// Return up to `k` nearest neighbours of `query`, ordered by
    /// descending score with ties broken by descending `indexed_at` then
    /// ascending `id`. Empty on an empty collection.
    async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>, VectorStoreError>;

    /// True iff the collection exists, is non-empty, and contains at least
    /// one point within the 24h retention window.
    async fn has_24h_of_data(&self) -> Result<bool, VectorStoreError>;

    /// Best-effort deletion of points older than 24h. Transport failures
    /// are the caller's to log; this method itself still returns `Ok` after
    /// logging internally so upstream ingestion is never blocked by a
    /// retention-sweep failure.
    async fn delete_vectors_older_than_24h(&self) -> Result<(), VectorStoreError>;
}

/// Sort hits by descending score, descending `indexed_at`, ascending `id` —
/// the documented tie-break rule.
pub(crate) fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.point.indexed_at.cmp(&a.point.indexed_at))
            .then_with(|| a.point.id.cmp(&b.point.id))
    });
}
