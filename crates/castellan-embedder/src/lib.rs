#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-embedder** – maps text to a fixed-dimension embedding via a
//! remote model endpoint, fronted by a content-addressed cache.

mod cache;
mod error;
mod http;

pub use cache::{CacheStats, EmbeddingCache};
pub use error::EmbedderError;
pub use http::{HttpEmbedder, HttpEmbedderConfig};

use async_trait::async_trait;
use castellan_types::Embedding;
use tokio_util::sync::CancellationToken;

/// Abstract embedding provider. `embed` never throws on parse failure —
/// it returns an empty vector (the sentinel for "failed") per the wire
/// contract; transport failures propagate as [`EmbedderError`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`, honouring `cancel`. Returns an empty vector if the
    /// endpoint responded successfully but without a usable embedding.
    async fn embed(&self, text: &str, cancel: CancellationToken) -> Result<Embedding, EmbedderError>;

    /// Provider name used in the fingerprint / cache key, e.g.
    /// `"local-model-server"`.
    fn provider_name(&self) -> &str;

    /// Model name used in the fingerprint / cache key.
    fn model_name(&self) -> &str;
}

/// An [`Embedder`] fronted by a content-addressed [`EmbeddingCache`].
///
/// Mirrors the decorator idiom used throughout this workspace's LLM chain:
/// a single inner implementation, one additional concern layered on top.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: EmbeddingCache,
}

impl<E: Embedder> CachedEmbedder<E> {
    /// Wrap `inner` with `cache`.
    pub fn new(inner: E, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }

    /// Expose cache hit/miss statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl<E: Embedder + Send + Sync> Embedder for CachedEmbedder<E> {
    async fn embed(&self, text: &str, cancel: CancellationToken) -> Result<Embedding, EmbedderError> {
        let key = self
            .cache
            .key(self.inner.provider_name(), self.inner.model_name(), text);

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let embedding = self.inner.embed(text, cancel).await?;
        if !embedding.is_empty() {
            self.cache.put(key, embedding.clone());
        }
        Ok(embedding)
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
