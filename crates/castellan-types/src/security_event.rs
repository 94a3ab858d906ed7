use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CastellanError;
use crate::event::LogEvent;
use crate::response::{LlmSecurityEventResponse, RiskLevel};
use crate::Embedding;

/// A point stored in the vector index: an event's fingerprint-derived id,
/// its embedding, and the original event enriched with `risk_level` and
/// `indexed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Point id, equal to the originating `LogEvent::unique_id`.
    pub id: String,
    /// Embedding vector.
    pub vector: Embedding,
    /// The original event this point was derived from.
    pub event: LogEvent,
    /// Risk level assigned at indexing time.
    pub risk_level: RiskLevel,
    /// Instant this point was written to the index.
    pub indexed_at: DateTime<Utc>,
}

impl VectorPoint {
    /// True if `indexed_at` is within `window` of `now` — the per-point
    /// retention-window predicate used by `VectorStore::has_24h_of_data`
    /// and the retention sweep.
    pub fn within_retention(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.indexed_at) <= window
    }
}

/// The record emitted by the analysis pipeline and handed to the
/// notification manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// The triggering raw event.
    pub original_event: LogEvent,
    /// The LLM (or deterministic-rule) classification.
    pub response: LlmSecurityEventResponse,
    /// True when classified by the closed rule set without invoking an LLM.
    pub is_deterministic: bool,
    /// True when classification was informed by historical neighbours.
    pub is_correlation_based: bool,
    /// True when both deterministic and correlation signals contributed.
    pub is_enhanced: bool,
    /// Correlation strength in `[0, 1]`.
    pub correlation_score: f64,
    /// Burst-activity strength in `[0, 1]`.
    pub burst_score: f64,
    /// Anomaly strength in `[0, 1]`.
    pub anomaly_score: f64,
    /// Opaque enrichment payload, e.g. IP geolocation or asset metadata.
    #[serde(default)]
    pub enrichment_data: Option<Value>,
}

impl SecurityEvent {
    /// Construct a `SecurityEvent`, enforcing the invariant that a
    /// non-correlation-based event carries all-zero correlation scores.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        original_event: LogEvent,
        response: LlmSecurityEventResponse,
        is_deterministic: bool,
        is_correlation_based: bool,
        correlation_score: f64,
        burst_score: f64,
        anomaly_score: f64,
        enrichment_data: Option<Value>,
    ) -> Result<Self, CastellanError> {
        if !is_correlation_based
            && (correlation_score != 0.0 || burst_score != 0.0 || anomaly_score != 0.0)
        {
            return Err(CastellanError::Invalid(
                "non-correlation-based event must carry all-zero correlation scores".into(),
            ));
        }
        for (name, score) in [
            ("correlation_score", correlation_score),
            ("burst_score", burst_score),
            ("anomaly_score", anomaly_score),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(CastellanError::OutOfBounds(format!(
                    "{name} {score} outside [0, 1]"
                )));
            }
        }
        let is_enhanced = is_deterministic && is_correlation_based;
        Ok(Self {
            original_event,
            response,
            is_deterministic,
            is_correlation_based,
            is_enhanced,
            correlation_score,
            burst_score,
            anomaly_score,
            enrichment_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLevel;
    use crate::response::EventType;

    fn sample_event() -> LogEvent {
        LogEvent::new(
            Utc::now(),
            "H1",
            "Security",
            4624,
            EventLevel::Information,
            "alice",
            "An account was successfully logged on",
            "",
            None,
        )
        .unwrap()
    }

    fn sample_response() -> LlmSecurityEventResponse {
        LlmSecurityEventResponse {
            risk: RiskLevel::Low,
            confidence: 85,
            summary: "Successful login detected".to_string(),
            mitre: vec!["T1078".to_string()],
            recommended_actions: vec!["Monitor user activity".to_string()],
            event_type: EventType::AuthenticationSuccess,
        }
    }

    #[test]
    fn non_correlation_event_forces_zero_scores() {
        let err = SecurityEvent::new(
            sample_event(),
            sample_response(),
            false,
            false,
            0.5,
            0.0,
            0.0,
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn correlation_event_allows_nonzero_scores() {
        let event = SecurityEvent::new(
            sample_event(),
            sample_response(),
            false,
            true,
            0.5,
            0.1,
            0.2,
            None,
        )
        .unwrap();
        assert!(event.is_correlation_based);
        assert!(!event.is_enhanced);
    }
}
