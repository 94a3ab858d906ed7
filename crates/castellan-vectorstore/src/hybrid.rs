use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use castellan_types::{Embedding, RiskLevel, VectorPoint};
use chrono::Utc;
use tracing::warn;

use crate::error::VectorStoreError;
use crate::{sort_hits, SearchHit, VectorStore};

/// Configuration for [`HybridRetriever`]'s re-ranking algorithm.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HybridConfig {
    /// Over-fetch multiplier applied to `k` before re-ranking. Must be
    /// `>= 1.0`.
    pub over_fetch_multiplier: f64,
    /// Weight of the recency term in the metadata score.
    pub recency_weight: f64,
    /// Weight of the risk-level term in the metadata score.
    pub risk_level_weight: f64,
    /// Exponential decay constant (hours) for the recency term.
    pub recency_decay_hours: f64,
    /// Weight of vector similarity in the combined score.
    pub vector_weight: f64,
    /// Weight of the metadata score in the combined score.
    pub metadata_weight: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            over_fetch_multiplier: 3.0,
            recency_weight: 0.5,
            risk_level_weight: 0.5,
            recency_decay_hours: 24.0,
            vector_weight: 0.7,
            metadata_weight: 0.3,
        }
    }
}

impl HybridConfig {
    /// True iff `recency_weight + risk_level_weight <= 1` and
    /// `vector_weight + metadata_weight == 1.0` and
    /// `over_fetch_multiplier >= 1.0`. An invalid configuration forces
    /// pass-through mode.
    fn is_valid(&self) -> bool {
        self.over_fetch_multiplier >= 1.0
            && self.recency_weight + self.risk_level_weight <= 1.0 + f64::EPSILON
            && (self.vector_weight + self.metadata_weight - 1.0).abs() < 1e-9
    }
}

/// Running counters exposed by [`HybridRetriever`].
#[derive(Debug, Default)]
pub struct HybridStats {
    total: AtomicU64,
    hybrid: AtomicU64,
    fallback: AtomicU64,
}

impl HybridStats {
    /// Total `search` invocations.
    pub fn total_searches(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
    /// Invocations that completed with hybrid re-ranking applied.
    pub fn hybrid_searches(&self) -> u64 {
        self.hybrid.load(Ordering::Relaxed)
    }
    /// Invocations that fell back to pure-vector search after the
    /// underlying store's `search` failed.
    pub fn fallback_searches(&self) -> u64 {
        self.fallback.load(Ordering::Relaxed)
    }
    /// Fraction of searches that used hybrid re-ranking.
    pub fn hybrid_rate(&self) -> f64 {
        let total = self.total_searches();
        if total == 0 {
            0.0
        } else {
            self.hybrid_searches() as f64 / total as f64
        }
    }
}

/// Decorator over a [`VectorStore`] that over-fetches candidates and
/// re-ranks them by a weighted blend of vector similarity and metadata
/// signals (recency decay, risk-level weight). Non-search operations pass
/// through unchanged.
pub struct HybridRetriever<S> {
    inner: S,
    config: HybridConfig,
    stats: HybridStats,
}

impl<S: VectorStore> HybridRetriever<S> {
    /// Wrap `inner` with `config`.
    pub fn new(inner: S, config: HybridConfig) -> Self {
        Self {
            inner,
            config,
            stats: HybridStats::default(),
        }
    }

    /// Expose running counters.
    pub fn stats(&self) -> &HybridStats {
        &self.stats
    }

    fn metadata_score(&self, point: &VectorPoint) -> f64 {
        let age_hours = Utc::now()
            .signed_duration_since(point.indexed_at)
            .num_seconds() as f64
            / 3600.0;
        let recency = self.config.recency_weight * (-age_hours / self.config.recency_decay_hours).exp();
        let risk = self.config.risk_level_weight * risk_score(point.risk_level);
        recency + risk
    }
}

fn risk_score(level: RiskLevel) -> f64 {
    level.metadata_weight()
}

#[async_trait]
impl<S: VectorStore> VectorStore for HybridRetriever<S> {
    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        self.inner.ensure_collection().await
    }

    async fn upsert(&self, point: VectorPoint) -> Result<(), VectorStoreError> {
        self.inner.upsert(point).await
    }

    async fn batch_upsert(&self, points: Vec<VectorPoint>) -> Result<(), VectorStoreError> {
        self.inner.batch_upsert(points).await
    }

    async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>, VectorStoreError> {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        if !self.config.is_valid() {
            warn!("hybrid retriever configuration invalid, falling back to pass-through");
            return self.inner.search(query, k).await;
        }

        let over_fetch = (k as f64 * self.config.over_fetch_multiplier).ceil() as usize;

        let candidates = match self.inner.search(query, over_fetch).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "underlying search failed, retrying without re-rank");
                self.stats.fallback.fetch_add(1, Ordering::Relaxed);
                return match self.inner.search(query, k).await {
                    Ok(hits) => Ok(hits),
                    Err(_) => Ok(Vec::new()),
                };
            }
        };

        let mut reranked: Vec<SearchHit> = candidates
            .into_iter()
            .map(|hit| {
                let metadata = self.metadata_score(&hit.point);
                let combined =
                    self.config.vector_weight * hit.score + self.config.metadata_weight * metadata;
                SearchHit {
                    point: hit.point,
                    score: combined,
                }
            })
            .collect();

        sort_hits(&mut reranked);
        reranked.truncate(k);
        self.stats.hybrid.fetch_add(1, Ordering::Relaxed);
        Ok(reranked)
    }

    async fn has_24h_of_data(&self) -> Result<bool, VectorStoreError> {
        self.inner.has_24h_of_data().await
    }

    async fn delete_vectors_older_than_24h(&self) -> Result<(), VectorStoreError> {
        self.inner.delete_vectors_older_than_24h().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::{EventLevel, LogEvent};
    use std::sync::Mutex;

    struct FakeStore {
        hits: Mutex<Vec<SearchHit>>,
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }
        async fn upsert(&self, _point: VectorPoint) -> Result<(), VectorStoreError> {
            Ok(())
        }
        async fn batch_upsert(&self, _points: Vec<VectorPoint>) -> Result<(), VectorStoreError> {
            Ok(())
        }
        async fn search(&self, _query: &Embedding, k: usize) -> Result<Vec<SearchHit>, VectorStoreError> {
            let mut hits = self.hits.lock().unwrap().clone();
            hits.truncate(k);
            Ok(hits)
        }
        async fn has_24h_of_data(&self) -> Result<bool, VectorStoreError> {
            Ok(true)
        }
        async fn delete_vectors_older_than_24h(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }
    }

    fn point(id: &str, age_hours: i64, risk: RiskLevel) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector: vec![0.0],
            event: LogEvent::new(
                Utc::now(),
                "H1",
                "Security",
                4624,
                EventLevel::Information,
                "alice",
                "message",
                "",
                None,
            )
            .unwrap(),
            risk_level: risk,
            indexed_at: Utc::now() - chrono::Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn over_fetches_by_configured_multiplier() {
        let fake = FakeStore {
            hits: Mutex::new(vec![
                SearchHit { point: point("a", 48, RiskLevel::Medium), score: 0.80 },
                SearchHit { point: point("b", 1, RiskLevel::Medium), score: 0.75 },
            ]),
        };
        let retriever = HybridRetriever::new(fake, HybridConfig::default());
        let result = retriever.search(&vec![1.0], 1).await.unwrap();
        assert!(result.len() <= 1);
    }

    #[tokio::test]
    async fn recency_favoured_candidate_ranks_first() {
        let fake = FakeStore {
            hits: Mutex::new(vec![
                SearchHit { point: point("old", 48, RiskLevel::Medium), score: 0.80 },
                SearchHit { point: point("recent", 1, RiskLevel::Medium), score: 0.75 },
            ]),
        };
        let config = HybridConfig {
            vector_weight: 0.7,
            metadata_weight: 0.3,
            recency_decay_hours: 24.0,
            recency_weight: 0.5,
            risk_level_weight: 0.5,
            over_fetch_multiplier: 3.0,
        };
        let retriever = HybridRetriever::new(fake, config);
        let result = retriever.search(&vec![1.0], 2).await.unwrap();
        assert_eq!(result[0].point.id, "recent");
    }

    #[tokio::test]
    async fn invalid_config_forces_pass_through() {
        let fake = FakeStore {
            hits: Mutex::new(vec![SearchHit { point: point("a", 1, RiskLevel::Low), score: 0.5 }]),
        };
        let config = HybridConfig {
            vector_weight: 0.9,
            metadata_weight: 0.9, // invalid: sums > 1
            ..HybridConfig::default()
        };
        let retriever = HybridRetriever::new(fake, config);
        let result = retriever.search(&vec![1.0], 5).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(retriever.stats().hybrid_searches(), 0);
    }

    proptest::proptest! {
        /// Regardless of how many candidates the underlying store returns or
        /// how they're scored, `search` never returns more than `k` hits and
        /// always returns them sorted by descending score.
        #[test]
        fn search_bounds_and_orders_results(
            scores in proptest::collection::vec(0.0f64..1.0, 0..20),
            k in 1usize..10,
        ) {
            tokio_test::block_on(async {
                let hits = scores
                    .iter()
                    .enumerate()
                    .map(|(i, &score)| SearchHit {
                        point: point(&format!("p{i}"), i as i64, RiskLevel::Medium),
                        score,
                    })
                    .collect();
                let fake = FakeStore { hits: Mutex::new(hits) };
                let retriever = HybridRetriever::new(fake, HybridConfig::default());
                let result = retriever.search(&vec![1.0], k).await.unwrap();

                proptest::prop_assert!(result.len() <= k);
                for pair in result.windows(2) {
                    proptest::prop_assert!(pair[0].score >= pair[1].score);
                }
                Ok(())
            })?;
        }
    }
}
