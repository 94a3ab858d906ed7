use async_trait::async_trait;
use castellan_types::{Embedding, LogEvent, RiskLevel, VectorPoint};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{instrument, warn};

use crate::config::VectorStoreConfig;
use crate::error::VectorStoreError;
use crate::{sort_hits, SearchHit, VectorStore};

/// REST-backed [`VectorStore`] over a Qdrant-shaped HTTP contract: create
/// collection, upsert points, search with timestamp filter, scroll for
/// retention queries, delete by filter.
pub struct RestVectorStore {
    client: reqwest::Client,
    config: VectorStoreConfig,
}

impl RestVectorStore {
    /// Construct a new store from `config`.
    pub fn new(config: VectorStoreConfig) -> Result<Self, VectorStoreError> {
        config.validate()?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.config.endpoint, self.config.collection)
    }
}

#[async_trait]
impl VectorStore for RestVectorStore {
    #[instrument(skip(self), fields(collection = %self.config.collection))]
    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.config.dimension, "distance": distance_name(self.config.distance) }
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::CONFLICT => Ok(()),
            status => {
                let response = response.error_for_status();
                if response.is_err() {
                    return Err(response.unwrap_err().into());
                }
                warn!(?status, "unexpected status ensuring collection");
                Ok(())
            }
        }
    }

    async fn upsert(&self, point: VectorPoint) -> Result<(), VectorStoreError> {
        self.batch_upsert(vec![point]).await
    }

    #[instrument(skip(self, points), fields(count = points.len()))]
    async fn batch_upsert(&self, points: Vec<VectorPoint>) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let payload: Vec<_> = points.iter().map(PointWire::from).collect();

        self.client
            .put(format!("{}/points", self.collection_url()))
            .json(&json!({ "points": payload }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchHit>, VectorStoreError> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({ "vector": query, "limit": k }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response.error_for_status()?;
        let body: SearchResponse = response.json().await?;

        let mut hits: Vec<SearchHit> = body
            .result
            .into_iter()
            .map(|r| SearchHit {
                point: r.into_point(),
                score: r.score,
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    #[instrument(skip(self))]
    async fn has_24h_of_data(&self) -> Result<bool, VectorStoreError> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let response = self
            .client
            .post(format!("{}/points/scroll", self.collection_url()))
            .json(&json!({
                "filter": { "must": [{ "key": "indexed_at", "range": { "gte": cutoff } }] },
                "limit": 1,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let response = response.error_for_status()?;
        let body: ScrollResponse = response.json().await?;
        Ok(!body.points.is_empty())
    }

    #[instrument(skip(self))]
    async fn delete_vectors_older_than_24h(&self) -> Result<(), VectorStoreError> {
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let result = self
            .client
            .post(format!("{}/points/delete", self.collection_url()))
            .json(&json!({
                "filter": { "must": [{ "key": "indexed_at", "range": { "lt": cutoff } }] }
            }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => Ok(()),
            Ok(response) => {
                warn!(status = %response.status(), "retention sweep returned non-success status");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "retention sweep transport failure, continuing");
                Ok(())
            }
        }
    }
}

fn distance_name(distance: crate::DistanceMetric) -> &'static str {
    match distance {
        crate::DistanceMetric::Cosine => "Cosine",
        crate::DistanceMetric::Euclidean => "Euclid",
        crate::DistanceMetric::Dot => "Dot",
    }
}

#[derive(serde::Serialize)]
struct PointWire<'a> {
    id: &'a str,
    vector: &'a Embedding,
    payload: PointPayload<'a>,
}

#[derive(serde::Serialize)]
struct PointPayload<'a> {
    event: &'a LogEvent,
    risk_level: RiskLevel,
    indexed_at: DateTime<Utc>,
}

impl<'a> From<&'a VectorPoint> for PointWire<'a> {
    fn from(p: &'a VectorPoint) -> Self {
        Self {
            id: &p.id,
            vector: &p.vector,
            payload: PointPayload {
                event: &p.event,
                risk_level: p.risk_level,
                indexed_at: p.indexed_at,
            },
        }
    }
}

#[derive(serde::Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(serde::Deserialize)]
struct ScoredPoint {
    score: f64,
    id: String,
    vector: Embedding,
    payload: ScoredPayload,
}

#[derive(serde::Deserialize)]
struct ScoredPayload {
    event: LogEvent,
    risk_level: RiskLevel,
    indexed_at: DateTime<Utc>,
}

impl ScoredPoint {
    fn into_point(self) -> VectorPoint {
        VectorPoint {
            id: self.id,
            vector: self.vector,
            event: self.payload.event,
            risk_level: self.payload.risk_level,
            indexed_at: self.payload.indexed_at,
        }
    }
}

#[derive(serde::Deserialize)]
struct ScrollResponse {
    points: Vec<serde_json::Value>,
}
