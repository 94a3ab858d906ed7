#![forbid(unsafe_code)]

//! **castellan-cli** – entry point for the Castellan security-event triage
//! pipeline: loads configuration, wires the collector, embedder, vector
//! store, LLM chain, analysis pipeline, and notification manager together,
//! and runs them until a shutdown signal arrives.

mod config;
mod jsonl_channel;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use castellan_collector::{EventChannel, EventCollector, FileBookmarkStore};
use castellan_embedder::{CachedEmbedder, Embedder, EmbeddingCache, HttpEmbedder};
use castellan_llm::{BaseLlmClient, LlmClient, ResilienceClient, StrictJsonClient, TelemetryClient};
use castellan_notify::{ChannelDriver, NotificationManager, SlackChannel, TeamsChannel};
use castellan_pipeline::AnalysisPipeline;
use castellan_types::{LogEvent, SecurityEvent, VectorPoint};
use castellan_vectorstore::{HybridRetriever, RestVectorStore, VectorStore};
use clap::{Parser, Subcommand};
use config::{RawConfig, Secrets};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "castellan")]
#[command(about = "Windows security-event triage pipeline")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "castellan.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail configured channels live, advancing durable bookmarks.
    Run,
    /// Replay the last 24 hours of each configured channel, then exit.
    Replay,
    /// Probe every notification channel's connectivity and print the
    /// result.
    Healthcheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    info!("starting castellan-cli v{}", env!("CARGO_PKG_VERSION"));

    let raw = RawConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let secrets = Secrets::load();

    match cli.command {
        Commands::Run => run(raw, secrets).await,
        Commands::Replay => replay(raw, secrets).await,
        Commands::Healthcheck => healthcheck(raw, secrets).await,
    }
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn build_embedder(raw: &config::RawEmbedderConfig) -> Result<CachedEmbedder<HttpEmbedder>> {
    let (capacity, ttl) = raw.cache_params();
    let inner = HttpEmbedder::new(raw.to_embedder_config()).context("constructing embedder")?;
    Ok(CachedEmbedder::new(inner, EmbeddingCache::new(capacity, ttl)))
}

fn build_vectorstore(
    vs_config: &castellan_vectorstore::VectorStoreConfig,
    hybrid_config: &castellan_vectorstore::HybridConfig,
) -> Result<HybridRetriever<RestVectorStore>> {
    let inner = RestVectorStore::new(vs_config.clone()).context("constructing vector store")?;
    Ok(HybridRetriever::new(inner, hybrid_config.clone()))
}

/// Five-layer-minus-ensemble decorator chain: base transport wrapped with
/// resilience (retry/breaker/timeout), strict-JSON extraction, and
/// telemetry spans. Multi-model ensemble voting is an optional enhancement
/// this wiring does not enable; see the open question recorded in
/// DESIGN.md.
fn build_llm(raw: &RawConfig, secrets: &Secrets) -> Result<impl LlmClient> {
    let base_config = raw.llm.to_base_config(secrets.llm_api_key())?;
    let provider_name = base_config.provider.name();
    let base = BaseLlmClient::new(base_config).context("constructing base llm client")?;
    let resilient = ResilienceClient::new(base, raw.llm.resilience.to_resilience_config());
    let strict = StrictJsonClient::new(resilient, raw.llm.strict_json.to_strict_json_config());
    Ok(TelemetryClient::new(strict, provider_name))
}

fn build_notify(raw: &RawConfig, secrets: &Secrets) -> Result<NotificationManager> {
    let mut channels: Vec<Arc<dyn ChannelDriver>> = Vec::new();
    for name in &raw.notify.channels {
        match name.to_lowercase().as_str() {
            "teams" => {
                let url = secrets
                    .teams_webhook_url()
                    .context("CASTELLAN_TEAMS_WEBHOOK_URL not set but \"teams\" channel configured")?;
                channels.push(Arc::new(TeamsChannel::new("teams", url)?));
            }
            "slack" => {
                let url = secrets
                    .slack_webhook_url()
                    .context("CASTELLAN_SLACK_WEBHOOK_URL not set but \"slack\" channel configured")?;
                channels.push(Arc::new(SlackChannel::new("slack", url)?));
            }
            other => anyhow::bail!("unknown notification channel {other:?}, expected \"teams\" or \"slack\""),
        }
    }
    Ok(NotificationManager::new(channels, raw.notify.to_notify_config())?)
}

fn build_channels(raw: &RawConfig) -> Vec<Arc<dyn EventChannel>> {
    raw.collector
        .channels
        .iter()
        .map(|name| Arc::new(jsonl_channel::JsonlEventChannel::new(name.clone(), &raw.data_dir)) as Arc<dyn EventChannel>)
        .collect()
}

async fn run(raw: RawConfig, secrets: Secrets) -> Result<()> {
    let cancel = CancellationToken::new();

    let bookmarks = Arc::new(FileBookmarkStore::new(format!("{}/bookmarks", raw.data_dir)).await?);
    let collector = EventCollector::new(build_channels(&raw), bookmarks, raw.collector.clone())
        .context("constructing collector")?;

    let indexing_embedder = build_embedder(&raw.embedder)?;
    let indexing_vectorstore = build_vectorstore(&raw.vectorstore, &raw.hybrid)?;
    indexing_vectorstore.ensure_collection().await.context("ensuring vector collection exists")?;

    let pipeline_embedder = build_embedder(&raw.embedder)?;
    let pipeline_vectorstore = build_vectorstore(&raw.vectorstore, &raw.hybrid)?;
    let llm = build_llm(&raw, &secrets)?;
    let notify = build_notify(&raw, &secrets)?;

    let (tx, rx) = mpsc::channel::<SecurityEvent>(raw.pipeline.queue_capacity.max(1));
    let pipeline = AnalysisPipeline::new(
        pipeline_embedder,
        pipeline_vectorstore,
        llm,
        raw.pipeline.to_pipeline_config(),
        tx,
    )
    .context("constructing analysis pipeline")?;

    let mut source = collector.collect_live(cancel.clone());
    let queue = pipeline.queue();
    let feed_cancel = cancel.clone();
    let feeder = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = source.recv() => {
                    match event {
                        Some(event) => queue.push(event).await,
                        None => break,
                    }
                }
                _ = feed_cancel.cancelled() => break,
            }
        }
    });

    let pipeline_cancel = cancel.clone();
    let pipeline_handle = tokio::spawn(pipeline.run(pipeline_cancel));

    let indexer_handle = tokio::spawn(index_and_notify(
        rx,
        indexing_embedder,
        indexing_vectorstore,
        notify,
    ));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received");
    cancel.cancel();

    let _ = feeder.await;
    let _ = pipeline_handle.await;
    let _ = indexer_handle.await;

    info!("castellan-cli shut down cleanly");
    Ok(())
}

async fn replay(raw: RawConfig, secrets: Secrets) -> Result<()> {
    let cancel = CancellationToken::new();

    let bookmarks = Arc::new(FileBookmarkStore::new(format!("{}/bookmarks", raw.data_dir)).await?);
    let collector = EventCollector::new(build_channels(&raw), bookmarks, raw.collector.clone())
        .context("constructing collector")?;

    let indexing_embedder = build_embedder(&raw.embedder)?;
    let indexing_vectorstore = build_vectorstore(&raw.vectorstore, &raw.hybrid)?;
    indexing_vectorstore.ensure_collection().await.context("ensuring vector collection exists")?;

    let pipeline_embedder = build_embedder(&raw.embedder)?;
    let pipeline_vectorstore = build_vectorstore(&raw.vectorstore, &raw.hybrid)?;
    let llm = build_llm(&raw, &secrets)?;
    let notify = build_notify(&raw, &secrets)?;

    let (tx, rx) = mpsc::channel::<SecurityEvent>(raw.pipeline.queue_capacity.max(1));
    let pipeline = AnalysisPipeline::new(
        pipeline_embedder,
        pipeline_vectorstore,
        llm,
        raw.pipeline.to_pipeline_config(),
        tx,
    )
    .context("constructing analysis pipeline")?;

    let mut source = collector.collect_historical(cancel.clone());
    let queue = pipeline.queue();
    let feeder = tokio::spawn(async move {
        while let Some(event) = source.recv().await {
            queue.push(event).await;
        }
    });

    let pipeline_cancel = cancel.clone();
    let pipeline_handle = tokio::spawn(pipeline.run(pipeline_cancel));
    let indexer_handle = tokio::spawn(index_and_notify(
        rx,
        indexing_embedder,
        indexing_vectorstore,
        notify,
    ));

    feeder.await.context("joining historical feeder")?;
    while queue.len().await > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    cancel.cancel();
    pipeline_handle.await.context("joining pipeline")?;
    indexer_handle.await.context("joining indexer")?;

    info!("replay complete");
    Ok(())
}

/// Drains `rx`, indexing each assembled event into the vector store (so
/// later events can correlate against it) and forwarding it to the
/// notification manager. Re-embeds `original_event` rather than reusing
/// the pipeline's internal embedding, since `AnalysisPipeline` does not
/// expose the vector it computed for its own search step — the content
/// cache fronting the embedder absorbs the repeat call.
async fn index_and_notify<E, S>(
    mut rx: mpsc::Receiver<SecurityEvent>,
    embedder: E,
    vectorstore: S,
    notify: NotificationManager,
) where
    E: Embedder + 'static,
    S: VectorStore + 'static,
{
    while let Some(event) = rx.recv().await {
        if let Err(err) = index_event(&embedder, &vectorstore, &event.original_event, &event).await {
            warn!(error = %err, "failed to index security event, continuing");
        }
        notify.send_security_alert(&event).await;
    }
}

async fn index_event<E: Embedder, S: VectorStore>(
    embedder: &E,
    vectorstore: &S,
    original_event: &LogEvent,
    event: &SecurityEvent,
) -> Result<()> {
    let vector = embedder
        .embed(&original_event.message, CancellationToken::new())
        .await
        .context("re-embedding event for indexing")?;
    if vector.is_empty() {
        return Ok(());
    }
    let point = VectorPoint {
        id: original_event.unique_id.clone(),
        vector,
        event: original_event.clone(),
        risk_level: event.response.risk,
        indexed_at: chrono::Utc::now(),
    };
    vectorstore.upsert(point).await.context("upserting vector point")?;
    Ok(())
}

async fn healthcheck(raw: RawConfig, secrets: Secrets) -> Result<()> {
    let notify = build_notify(&raw, &secrets)?;
    let snapshots = notify.health();
    if snapshots.is_empty() {
        println!("no notification channels configured");
    }
    for snapshot in snapshots {
        println!(
            "{}: healthy={} successes={} failures={}",
            snapshot.channel, snapshot.is_healthy, snapshot.success_count, snapshot.failure_count
        );
    }

    let vectorstore = build_vectorstore(&raw.vectorstore, &raw.hybrid)?;
    match vectorstore.ensure_collection().await {
        Ok(()) => println!("vectorstore: reachable"),
        Err(err) => {
            error!(error = %err, "vectorstore unreachable");
            println!("vectorstore: unreachable ({err})");
        }
    }

    Ok(())
}
