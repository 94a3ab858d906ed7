#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-llm** – a composable LLM client chain: base transport,
//! resilience (retry, circuit breaker, timeout), strict-JSON
//! extraction/repair, telemetry, and optional multi-model ensemble voting.
//!
//! Each layer wraps exactly one inner [`LlmClient`] by ownership; there is
//! no inheritance and no shared mutable state between layers beyond the
//! atomics/locks each layer documents for its own statistics.

mod base;
mod circuit_breaker;
mod ensemble;
mod error;
mod resilience;
mod strict_json;
mod telemetry;

pub use base::{BaseLlmClient, BaseLlmConfig, ModelProvider};
pub use ensemble::{AggregationConfig, ConfidenceReducer, EnsembleClient, EnsembleConfig};
pub use error::LlmError;
pub use resilience::{ResilienceClient, ResilienceConfig, ResilienceStats};
pub use strict_json::{StrictJsonClient, StrictJsonConfig, StrictJsonStats};
pub use telemetry::TelemetryClient;

use async_trait::async_trait;
use castellan_types::LogEvent;
use tokio_util::sync::CancellationToken;

/// Composable LLM client contract. Every decorator wraps a single inner
/// implementation and adds one concern.
///
/// The base client (bottom of the chain) propagates transport failures as
/// `Err`; JSON-envelope parse failures return `Ok(String::new())` instead.
/// From the [`ResilienceClient`] layer upward, every decorator guarantees
/// `Ok` — terminal failures (breaker-open, timeout, retries exhausted) are
/// folded into an empty string rather than surfaced.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Classify `event` in light of `neighbours`, returning the raw JSON
    /// text returned by the model.
    async fn analyze(
        &self,
        event: &LogEvent,
        neighbours: &[LogEvent],
        cancel: CancellationToken,
    ) -> Result<String, LlmError>;

    /// Free-form completion given a system/user prompt pair.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: CancellationToken,
    ) -> Result<String, LlmError>;
}

/// Render the up-to-K neighbours block used by the base client's prompt,
/// each line `ISO-8601 [channel/eventId] message`,
/// separated by `\n---\n`.
pub fn render_neighbours(neighbours: &[LogEvent]) -> String {
    neighbours
        .iter()
        .map(|n| format!("{} [{}/{}] {}", n.time.to_rfc3339(), n.channel, n.event_id, n.message))
        .collect::<Vec<_>>()
        .join("\n---\n")
}
