use std::time::Duration;

use castellan_types::RiskLevel;

use crate::correlation::CorrelationType;
use crate::error::NotifyError;

/// Per-severity throttle window for `send_security_alert`: at most one
/// notification per (channel, severity) within the window. Critical alerts
/// are never throttled.
pub fn severity_throttle_window(severity: RiskLevel) -> Duration {
    match severity {
        RiskLevel::Critical => Duration::ZERO,
        RiskLevel::High => Duration::from_secs(5 * 60),
        RiskLevel::Medium => Duration::from_secs(15 * 60),
        RiskLevel::Low => Duration::from_secs(60 * 60),
    }
}

/// Per-correlation-type throttle window for `send_correlation_alert`.
pub fn correlation_throttle_window(kind: CorrelationType) -> Duration {
    match kind {
        CorrelationType::AttackChain => Duration::from_secs(10 * 60),
        CorrelationType::LateralMovement => Duration::from_secs(15 * 60),
        CorrelationType::PrivilegeEscalation => Duration::from_secs(20 * 60),
        CorrelationType::TemporalBurst => Duration::from_secs(30 * 60),
        CorrelationType::MlDetected => Duration::from_secs(45 * 60),
    }
}

/// Uniform throttle window applied to every `send_attack_chain_alert` call,
/// regardless of the chain's contents.
pub const ATTACK_CHAIN_THROTTLE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Maximum notifications allowed per channel within [`Self::rate_limit_period`].
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Burst capacity of the per-channel global rate limiter.
    pub rate_limit_burst: u32,
    /// Rolling period the burst capacity replenishes over.
    pub rate_limit_period: Duration,
    /// Maximum delivery attempts per notification, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each subsequent attempt.
    pub retry_base_delay: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            rate_limit_burst: 10,
            rate_limit_period: Duration::from_secs(5 * 60),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl NotifyConfig {
    /// Reject configurations that can never make progress.
    pub fn validate(&self) -> Result<(), NotifyError> {
        if self.rate_limit_burst == 0 {
            return Err(NotifyError::Config("rate_limit_burst must be > 0".into()));
        }
        if self.rate_limit_period.is_zero() {
            return Err(NotifyError::Config("rate_limit_period must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(NotifyError::Config("max_attempts must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_is_never_throttled() {
        assert_eq!(severity_throttle_window(RiskLevel::Critical), Duration::ZERO);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(NotifyConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_burst_rejected() {
        let config = NotifyConfig {
            rate_limit_burst: 0,
            ..NotifyConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
