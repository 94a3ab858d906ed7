use serde::{Deserialize, Serialize};

use crate::error::CastellanError;

/// Risk classification assigned by the LLM analysis chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No significant risk indicated.
    Low,
    /// Noteworthy but not urgent.
    Medium,
    /// Requires prompt attention.
    High,
    /// Requires immediate attention.
    Critical,
}

impl RiskLevel {
    /// Fixed weight used by the hybrid re-ranker's metadata score
    /// (`score(riskLevel)` in the retrieval algorithm).
    pub fn metadata_weight(self) -> f64 {
        match self {
            RiskLevel::Critical => 1.0,
            RiskLevel::High => 0.75,
            RiskLevel::Medium => 0.5,
            RiskLevel::Low => 0.25,
        }
    }
}

/// Closed taxonomy of event types a `SecurityEvent` may be classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Successful authentication.
    AuthenticationSuccess,
    /// Failed authentication attempt.
    AuthenticationFailure,
    /// Account creation, deletion, or modification.
    AccountManagement,
    /// Privilege escalation attempt or grant.
    PrivilegeEscalation,
    /// A new service was installed.
    ServiceInstallation,
    /// A scheduled task was created or modified.
    ScheduledTask,
    /// A new process was created.
    ProcessCreation,
    /// PowerShell script block or command execution.
    PowerShellExecution,
    /// Unusually high rate of related activity.
    BurstActivity,
    /// Activity correlated with other historical events.
    CorrelatedActivity,
    /// Activity that deviates from the expected baseline.
    AnomalousActivity,
    /// Activity matching a suspicious heuristic.
    SuspiciousActivity,
    /// No more specific classification applies.
    Unknown,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Unknown
    }
}

/// Minimum allowed length of the `summary` field.
pub const MIN_SUMMARY_LEN: usize = 10;
/// Maximum allowed length of the `summary` field.
pub const MAX_SUMMARY_LEN: usize = 500;

/// Structured response produced (directly or via repair/fallback) by the
/// LLM analysis chain for a single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSecurityEventResponse {
    /// Assessed risk level.
    pub risk: RiskLevel,
    /// Confidence in `[0, 100]`.
    pub confidence: u8,
    /// Human-readable summary, 10-500 chars.
    pub summary: String,
    /// Ordered set of MITRE ATT&CK technique ids, e.g. `"T1078"`.
    #[serde(default)]
    pub mitre: Vec<String>,
    /// Ordered list of recommended remediation actions.
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    /// Classification within the closed event-type taxonomy.
    #[serde(default)]
    pub event_type: EventType,
}

impl LlmSecurityEventResponse {
    /// Validate the response against the documented schema constraints:
    /// `summary` length bounds and non-empty, `confidence` already bounded
    /// by its `u8` representation but re-checked against the documented
    /// `[0, 100]` range for defense against future widening of the type.
    pub fn validate(&self) -> Result<(), CastellanError> {
        if self.summary.trim().is_empty() {
            return Err(CastellanError::Invalid("summary must not be empty".into()));
        }
        if self.summary.len() < MIN_SUMMARY_LEN || self.summary.len() > MAX_SUMMARY_LEN {
            return Err(CastellanError::OutOfBounds(format!(
                "summary length {} outside [{}, {}]",
                self.summary.len(),
                MIN_SUMMARY_LEN,
                MAX_SUMMARY_LEN
            )));
        }
        if self.confidence > 100 {
            return Err(CastellanError::OutOfBounds(format!(
                "confidence {} exceeds 100",
                self.confidence
            )));
        }
        Ok(())
    }

    /// Build the canned fallback response StrictJson synthesizes when
    /// extraction and repair both fail: `risk=low, confidence=25`, the
    /// given (possibly extracted) summary, empty `mitre`/`recommended_actions`.
    pub fn fallback(summary: impl Into<String>) -> Self {
        let mut summary = summary.into();
        if summary.len() < MIN_SUMMARY_LEN {
            summary = "Automated analysis unavailable; manual review recommended.".to_string();
        }
        if summary.len() > MAX_SUMMARY_LEN {
            summary.truncate(MAX_SUMMARY_LEN);
        }
        Self {
            risk: RiskLevel::Low,
            confidence: 25,
            summary,
            mitre: Vec::new(),
            recommended_actions: Vec::new(),
            event_type: EventType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_uses_canned_message_when_extract_too_short() {
        let r = LlmSecurityEventResponse::fallback("hi");
        assert_eq!(r.confidence, 25);
        assert!(matches!(r.risk, RiskLevel::Low));
        assert!(r.summary.len() >= MIN_SUMMARY_LEN);
    }

    #[test]
    fn fallback_keeps_valid_extracted_summary() {
        let r = LlmSecurityEventResponse::fallback("Suspicious login burst detected on host H1");
        assert_eq!(r.summary, "Suspicious login burst detected on host H1");
    }

    #[test]
    fn validate_rejects_empty_summary() {
        let r = LlmSecurityEventResponse {
            risk: RiskLevel::Low,
            confidence: 10,
            summary: "   ".to_string(),
            mitre: vec![],
            recommended_actions: vec![],
            event_type: EventType::Unknown,
        };
        assert!(r.validate().is_err());
    }
}
