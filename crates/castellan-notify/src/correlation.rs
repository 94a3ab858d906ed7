use serde::{Deserialize, Serialize};

/// Closed taxonomy of correlation findings that can trigger a correlation
/// alert, each with its own throttle window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    /// Ordered sequence of events matching a known attack pattern.
    AttackChain,
    /// Same principal observed across unrelated hosts in a short window.
    LateralMovement,
    /// Escalation from a low-privilege to a high-privilege context.
    PrivilegeEscalation,
    /// Unusually dense cluster of related events.
    TemporalBurst,
    /// Correlation surfaced by the embedding/vector-search path rather than
    /// a named heuristic.
    MlDetected,
}

/// A correlation finding handed to `send_correlation_alert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    /// Which heuristic produced this finding.
    pub correlation_type: CorrelationType,
    /// `unique_id`s of the events this finding ties together.
    pub related_event_ids: Vec<String>,
    /// Human-readable description of the finding.
    pub description: String,
}

/// A reconstructed multi-step attack chain handed to
/// `send_attack_chain_alert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackChain {
    /// Stable identifier for this chain (e.g. derived from its first event).
    pub chain_id: String,
    /// Human-readable description of the chain as a whole.
    pub description: String,
    /// Ordered, human-readable description of each step in the chain.
    pub steps: Vec<String>,
}
