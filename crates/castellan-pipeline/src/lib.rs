#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-pipeline** – the orchestrator that turns a [`LogEvent`] into
//! a [`SecurityEvent`]: embed, search for similar recent events, analyze
//! with neighbours for context, and assemble the result. A closed rule set
//! classifies some events deterministically without ever calling the model.

mod config;
mod error;
mod queue;
mod rules;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use queue::DropOldestQueue;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use castellan_embedder::Embedder;
use castellan_llm::LlmClient;
use castellan_types::{LogEvent, SecurityEvent};
use castellan_vectorstore::VectorStore;
use chrono::Duration as ChronoDuration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Running counters exposed by [`AnalysisPipeline`].
#[derive(Debug, Default)]
pub struct PipelineStats {
    events_enqueued: AtomicU64,
    events_processed: AtomicU64,
    events_deterministic: AtomicU64,
    events_failed: AtomicU64,
    events_timed_out: AtomicU64,
}

impl PipelineStats {
    /// Total events accepted onto the input queue.
    pub fn events_enqueued(&self) -> u64 {
        self.events_enqueued.load(Ordering::Relaxed)
    }
    /// Total events that produced a `SecurityEvent`.
    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }
    /// Events classified by the deterministic rule set.
    pub fn events_deterministic(&self) -> u64 {
        self.events_deterministic.load(Ordering::Relaxed)
    }
    /// Events that failed (transport error, invalid response) after all
    /// decorator-level retries.
    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }
    /// Events that exceeded their per-event deadline.
    pub fn events_timed_out(&self) -> u64 {
        self.events_timed_out.load(Ordering::Relaxed)
    }
    /// Events evicted from the input queue by back-pressure. Delegates to
    /// the queue's own counter so callers have one place to read it.
    pub fn events_dropped(&self, queue: &DropOldestQueue) -> u64 {
        queue.dropped()
    }
}

/// The event-to-alert orchestrator: a bounded input queue, a fixed pool of
/// consumer workers, and the embed → search → analyze → assemble chain for
/// each event. Distinct events process concurrently; a single event's steps
/// run strictly in order.
pub struct AnalysisPipeline<E, S, C> {
    embedder: Arc<E>,
    retriever: Arc<S>,
    llm: Arc<C>,
    config: PipelineConfig,
    queue: Arc<DropOldestQueue>,
    stats: Arc<PipelineStats>,
    output: mpsc::Sender<SecurityEvent>,
}

impl<E, S, C> AnalysisPipeline<E, S, C>
where
    E: Embedder + Send + Sync + 'static,
    S: VectorStore + Send + Sync + 'static,
    C: LlmClient + Send + Sync + 'static,
{
    /// Construct a pipeline over `embedder`/`retriever`/`llm`, emitting
    /// assembled `SecurityEvent`s to `output`.
    pub fn new(
        embedder: E,
        retriever: S,
        llm: C,
        config: PipelineConfig,
        output: mpsc::Sender<SecurityEvent>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            embedder: Arc::new(embedder),
            retriever: Arc::new(retriever),
            llm: Arc::new(llm),
            queue: Arc::new(DropOldestQueue::new(config.queue_capacity)),
            config,
            stats: Arc::new(PipelineStats::default()),
            output,
        })
    }

    /// Expose running counters.
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Expose the input queue, for producers (the collector) to push into
    /// and for back-pressure inspection.
    pub fn queue(&self) -> Arc<DropOldestQueue> {
        self.queue.clone()
    }

    /// Accept one event onto the bounded input queue.
    pub async fn enqueue(&self, event: LogEvent) {
        self.stats.events_enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue.push(event).await;
    }

    /// Run `worker_count` consumer workers until `cancel` fires. Each worker
    /// pulls one event at a time, applies the per-event deadline, and sends
    /// the result to `output`; a deadline or analysis failure drops the
    /// event (counted) rather than blocking other workers.
    pub async fn run(self, cancel: CancellationToken) {
        info!(workers = self.config.worker_count, "starting analysis pipeline");
        let mut workers = JoinSet::new();

        for worker_id in 0..self.config.worker_count {
            let embedder = self.embedder.clone();
            let retriever = self.retriever.clone();
            let llm = self.llm.clone();
            let queue = self.queue.clone();
            let stats = self.stats.clone();
            let output = self.output.clone();
            let config = self.config.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                worker_loop(worker_id, embedder, retriever, llm, queue, stats, output, config, cancel).await;
            });
        }

        while workers.join_next().await.is_some() {}
        info!("analysis pipeline stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<E, S, C>(
    worker_id: usize,
    embedder: Arc<E>,
    retriever: Arc<S>,
    llm: Arc<C>,
    queue: Arc<DropOldestQueue>,
    stats: Arc<PipelineStats>,
    output: mpsc::Sender<SecurityEvent>,
    config: PipelineConfig,
    cancel: CancellationToken,
) where
    E: Embedder + Send + Sync,
    S: VectorStore + Send + Sync,
    C: LlmClient + Send + Sync,
{
    debug!(worker_id, "worker started");
    loop {
        let event = tokio::select! {
            event = queue.pop() => event,
            _ = cancel.cancelled() => break,
        };

        let outcome = tokio::time::timeout(
            config.event_deadline,
            process_event(&*embedder, &*retriever, &*llm, &event, config.neighbours_k, cancel.clone()),
        )
        .await;

        match outcome {
            Ok(Ok(security_event)) => {
                stats.events_processed.fetch_add(1, Ordering::Relaxed);
                if security_event.is_deterministic {
                    stats.events_deterministic.fetch_add(1, Ordering::Relaxed);
                }
                if output.send(security_event).await.is_err() {
                    warn!(worker_id, "output channel closed, stopping worker");
                    break;
                }
            }
            Ok(Err(err)) => {
                warn!(worker_id, error = %err, "event processing failed");
                stats.events_failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_elapsed) => {
                warn!(worker_id, "event processing exceeded deadline");
                stats.events_timed_out.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

#[instrument(skip(embedder, retriever, llm, cancel), fields(event_id = event.event_id, channel = %event.channel))]
async fn process_event<E, S, C>(
    embedder: &E,
    retriever: &S,
    llm: &C,
    event: &LogEvent,
    neighbours_k: usize,
    cancel: CancellationToken,
) -> Result<SecurityEvent, PipelineError>
where
    E: Embedder + Send + Sync,
    S: VectorStore + Send + Sync,
    C: LlmClient + Send + Sync,
{
    if let Some(response) = rules::classify_deterministic(event) {
        return Ok(SecurityEvent::new(event.clone(), response, true, false, 0.0, 0.0, 0.0, None)?);
    }

    let embedding = embedder.embed(&event.message, cancel.clone()).await?;

    let neighbours = if embedding.is_empty() {
        Vec::new()
    } else {
        retriever
            .search(&embedding, neighbours_k)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|hit| hit.point.event)
            .collect::<Vec<LogEvent>>()
    };

    let raw = llm.analyze(event, &neighbours, cancel).await?;
    let response: castellan_types::LlmSecurityEventResponse = serde_json::from_str(&raw)?;

    let is_correlation_based = !neighbours.is_empty();
    let (correlation_score, burst_score, anomaly_score) = if is_correlation_based {
        correlation_signals(event, &neighbours, neighbours_k)
    } else {
        (0.0, 0.0, 0.0)
    };

    Ok(SecurityEvent::new(
        event.clone(),
        response,
        false,
        is_correlation_based,
        correlation_score,
        burst_score,
        anomaly_score,
        None,
    )?)
}

/// Cheap, rule-derived signals from the neighbour set: `correlation_score`
/// scales with how many of the requested neighbours were actually found;
/// `burst_score` is the fraction of neighbours within a 5-minute window of
/// `event`; `anomaly_score` is left at 0 (no baseline model is in scope).
fn correlation_signals(event: &LogEvent, neighbours: &[LogEvent], neighbours_k: usize) -> (f64, f64, f64) {
    let correlation_score = (neighbours.len() as f64 / neighbours_k.max(1) as f64).min(1.0);

    let burst_window = ChronoDuration::minutes(5);
    let burst_count = neighbours
        .iter()
        .filter(|n| (event.time - n.time).num_seconds().abs() <= burst_window.num_seconds())
        .count();
    let burst_score = (burst_count as f64 / neighbours.len().max(1) as f64).min(1.0);

    (correlation_score, burst_score, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use castellan_embedder::EmbedderError;
    use castellan_llm::LlmError;
    use castellan_types::{EventLevel, Embedding};
    use castellan_vectorstore::{SearchHit, VectorStoreError};
    use chrono::{TimeZone, Utc};

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str, _cancel: CancellationToken) -> Result<Embedding, EmbedderError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
        fn provider_name(&self) -> &str {
            "test-embedder"
        }
        fn model_name(&self) -> &str {
            "test-model"
        }
    }

    struct OneNeighbourStore {
        neighbour: LogEvent,
    }

    #[async_trait]
    impl VectorStore for OneNeighbourStore {
        async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }
        async fn upsert(&self, _point: castellan_types::VectorPoint) -> Result<(), VectorStoreError> {
            Ok(())
        }
        async fn batch_upsert(&self, _points: Vec<castellan_types::VectorPoint>) -> Result<(), VectorStoreError> {
            Ok(())
        }
        async fn search(&self, _query: &Embedding, _k: usize) -> Result<Vec<SearchHit>, VectorStoreError> {
            Ok(vec![SearchHit {
                point: castellan_types::VectorPoint {
                    id: self.neighbour.unique_id.clone(),
                    vector: vec![0.1, 0.2, 0.3],
                    event: self.neighbour.clone(),
                    risk_level: castellan_types::RiskLevel::Low,
                    indexed_at: Utc::now(),
                },
                score: 0.9,
            }])
        }
        async fn has_24h_of_data(&self) -> Result<bool, VectorStoreError> {
            Ok(true)
        }
        async fn delete_vectors_older_than_24h(&self) -> Result<(), VectorStoreError> {
            Ok(())
        }
    }

    struct CannedLlm(&'static str);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn analyze(
            &self,
            _event: &LogEvent,
            _neighbours: &[LogEvent],
            _cancel: CancellationToken,
        ) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _cancel: CancellationToken,
        ) -> Result<String, LlmError> {
            Ok("ok".to_string())
        }
    }

    fn deterministic_rule_event() -> LogEvent {
        LogEvent::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            "H1",
            "Security",
            4625,
            EventLevel::Information,
            "alice",
            "An account failed to log on",
            "",
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn deterministic_rule_skips_model_entirely() {
        let embedder = FixedEmbedder;
        let neighbour = deterministic_rule_event();
        let retriever = OneNeighbourStore { neighbour: neighbour.clone() };
        let llm = CannedLlm("should not be called");

        let event = deterministic_rule_event();
        let security_event =
            process_event(&embedder, &retriever, &llm, &event, 5, CancellationToken::new())
                .await
                .unwrap();

        assert!(security_event.is_deterministic);
        assert!(!security_event.is_correlation_based);
        assert_eq!(security_event.correlation_score, 0.0);
    }

    #[tokio::test]
    async fn model_backed_path_assembles_security_event_with_neighbours() {
        let embedder = FixedEmbedder;
        let neighbour = LogEvent::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 11, 55, 0).unwrap(),
            "H1",
            "Security",
            4624,
            EventLevel::Information,
            "alice",
            "An account was successfully logged on",
            "",
            None,
        )
        .unwrap();
        let retriever = OneNeighbourStore { neighbour };
        let raw = r#"{"risk":"low","mitre":["T1078"],"confidence":85,"summary":"Successful login detected","recommended_actions":["Monitor user activity"]}"#;
        let llm = CannedLlm(raw);

        // 4624 is not in the deterministic rule set, so this event_id always
        // takes the model-backed path.
        let event = LogEvent::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            "H1",
            "Security",
            4624,
            EventLevel::Information,
            "alice",
            "An account was successfully logged on",
            "",
            None,
        )
        .unwrap();

        let security_event =
            process_event(&embedder, &retriever, &llm, &event, 5, CancellationToken::new())
                .await
                .unwrap();

        assert!(!security_event.is_deterministic);
        assert!(security_event.is_correlation_based);
        assert_eq!(security_event.response.confidence, 85);
        assert!(matches!(security_event.response.risk, castellan_types::RiskLevel::Low));
    }
}
