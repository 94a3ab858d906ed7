#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Throttled, rate-limited fan-out of [`SecurityEvent`]s to webhook channels.
//!
//! [`NotificationManager`] owns a set of [`ChannelDriver`]s and applies three
//! independent layers before a delivery reaches the wire: a per-(channel,
//! severity-or-correlation-type) throttle window, a global per-channel
//! rolling rate limit, and bounded retry with exponential backoff. It never
//! depends on the analysis pipeline crate directly — callers forward
//! `SecurityEvent`s produced elsewhere.

mod channels;
mod config;
mod correlation;
mod error;
mod templates;
mod throttle;

pub use channels::{ChannelDriver, ChannelHealth, ChannelHealthSnapshot, SlackChannel, TeamsChannel};
pub use config::NotifyConfig;
pub use correlation::{AttackChain, Correlation, CorrelationType};
pub use error::NotifyError;

use std::num::NonZeroU32;
use std::sync::Arc;

use castellan_types::SecurityEvent;
use chrono::Utc;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use throttle::ThrottleTracker;
use tracing::{info, warn};

type ChannelLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Registered delivery target plus its dedicated rate limiter and health
/// counters.
struct Registration {
    driver: Arc<dyn ChannelDriver>,
    limiter: ChannelLimiter,
    health: ChannelHealth,
}

/// Owns the registered channels and enforces throttle, rate-limit, and
/// retry policy before a [`SecurityEvent`] reaches a [`ChannelDriver`].
pub struct NotificationManager {
    channels: Vec<Registration>,
    config: NotifyConfig,
    throttle: ThrottleTracker,
}

impl NotificationManager {
    /// Register `channels` with `config`. Fails if `config` is invalid.
    pub fn new(
        channels: Vec<Arc<dyn ChannelDriver>>,
        config: NotifyConfig,
    ) -> Result<Self, NotifyError> {
        config.validate()?;
        let quota = Quota::with_period(config.rate_limit_period / config.rate_limit_burst)
            .ok_or_else(|| NotifyError::Config("rate_limit_period/burst must be > 0".into()))?
            .allow_burst(NonZeroU32::new(config.rate_limit_burst).unwrap());

        let channels = channels
            .into_iter()
            .map(|driver| Registration {
                driver,
                limiter: ChannelLimiter::direct(quota),
                health: ChannelHealth::new(),
            })
            .collect();

        Ok(Self {
            channels,
            config,
            throttle: ThrottleTracker::new(),
        })
    }

    /// Health snapshot for every registered channel.
    pub fn health(&self) -> Vec<ChannelHealthSnapshot> {
        self.channels
            .iter()
            .map(|reg| reg.health.snapshot(reg.driver.name()))
            .collect()
    }

    /// Dispatch `event` to every channel, throttled per (channel, severity).
    pub async fn send_security_alert(&self, event: &SecurityEvent) {
        let window = config::severity_throttle_window(event.response.risk);
        let key = format!("{:?}", event.response.risk).to_lowercase();
        self.fan_out(event, &key, window).await;
    }

    /// Dispatch `event` to every channel, throttled per (channel, correlation
    /// type).
    pub async fn send_correlation_alert(&self, event: &SecurityEvent, correlation: &Correlation) {
        let window = config::correlation_throttle_window(correlation.correlation_type);
        let key = format!("{:?}", correlation.correlation_type).to_lowercase();
        self.fan_out(event, &key, window).await;
    }

    /// Dispatch the most severe event in `events` to every channel, throttled
    /// uniformly per (channel, `"attack_chain"`) regardless of `chain`'s
    /// contents.
    pub async fn send_attack_chain_alert(&self, events: &[SecurityEvent], chain: &AttackChain) {
        let Some(lead) = events.iter().max_by_key(|e| e.response.confidence) else {
            warn!(chain_id = %chain.chain_id, "attack chain alert with no events, skipping");
            return;
        };
        self.fan_out(lead, "attack_chain", config::ATTACK_CHAIN_THROTTLE_WINDOW)
            .await;
    }

    async fn fan_out(&self, event: &SecurityEvent, throttle_key: &str, window: std::time::Duration) {
        let now = Utc::now();
        for reg in &self.channels {
            let name = reg.driver.name();
            if !self.throttle.check_and_record(name, throttle_key, now, window) {
                info!(channel = name, key = throttle_key, "alert throttled");
                continue;
            }
            if reg.limiter.check().is_err() {
                warn!(channel = name, "global rate limit exceeded, dropping alert");
                continue;
            }
            self.deliver_with_retry(reg, event).await;
        }
    }

    async fn deliver_with_retry(&self, reg: &Registration, event: &SecurityEvent) {
        let mut attempt = 0u32;
        let mut delay = self.config.retry_base_delay;
        loop {
            attempt += 1;
            match reg.driver.send(event).await {
                Ok(()) => {
                    reg.health.record_success(Utc::now());
                    return;
                }
                Err(err) if attempt >= self.config.max_attempts => {
                    reg.health.record_failure(Utc::now(), err.to_string());
                    warn!(channel = reg.driver.name(), attempts = attempt, error = %err, "delivery failed, giving up");
                    return;
                }
                Err(err) => {
                    warn!(channel = reg.driver.name(), attempt, error = %err, "delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use castellan_types::{EventLevel, EventType, LlmSecurityEventResponse, LogEvent, RiskLevel};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingChannel {
        name: String,
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl ChannelDriver for CountingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _event: &SecurityEvent) -> Result<(), NotifyError> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            if n < self.fail_first_n {
                Err(NotifyError::Config("simulated failure".into()))
            } else {
                Ok(())
            }
        }

        async fn test_connection(&self) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn sample_event(risk: RiskLevel) -> SecurityEvent {
        let original = LogEvent::new(
            Utc::now(),
            "H1",
            "Security",
            4625,
            EventLevel::Information,
            "alice",
            "m",
            "",
            None,
        )
        .unwrap();
        let response = LlmSecurityEventResponse {
            risk,
            confidence: 80,
            summary: "Repeated failed logons from a single host".to_string(),
            mitre: vec![],
            recommended_actions: vec![],
            event_type: EventType::AuthenticationFailure,
        };
        SecurityEvent::new(original, response, false, false, 0.0, 0.0, 0.0, None).unwrap()
    }

    #[tokio::test]
    async fn second_high_severity_alert_within_window_is_throttled() {
        let calls = Arc::new(AtomicU32::new(0));
        let channel = Arc::new(CountingChannel {
            name: "teams".to_string(),
            calls: calls.clone(),
            fail_first_n: 0,
        });
        let manager = NotificationManager::new(vec![channel], NotifyConfig::default()).unwrap();

        manager.send_security_alert(&sample_event(RiskLevel::High)).await;
        manager.send_security_alert(&sample_event(RiskLevel::High)).await;

        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn critical_alerts_are_never_throttled() {
        let calls = Arc::new(AtomicU32::new(0));
        let channel = Arc::new(CountingChannel {
            name: "teams".to_string(),
            calls: calls.clone(),
            fail_first_n: 0,
        });
        let manager = NotificationManager::new(vec![channel], NotifyConfig::default()).unwrap();

        manager.send_security_alert(&sample_event(RiskLevel::Critical)).await;
        manager.send_security_alert(&sample_event(RiskLevel::Critical)).await;

        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_and_recorded_healthy() {
        let calls = Arc::new(AtomicU32::new(0));
        let channel = Arc::new(CountingChannel {
            name: "teams".to_string(),
            calls: calls.clone(),
            fail_first_n: 1,
        });
        let config = NotifyConfig {
            retry_base_delay: std::time::Duration::from_millis(1),
            ..NotifyConfig::default()
        };
        let manager = NotificationManager::new(vec![channel], config).unwrap();

        manager.send_security_alert(&sample_event(RiskLevel::Critical)).await;

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        let health = manager.health();
        assert_eq!(health.len(), 1);
        assert!(health[0].is_healthy);
        assert_eq!(health[0].success_count, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_channel_unhealthy() {
        let calls = Arc::new(AtomicU32::new(0));
        let channel = Arc::new(CountingChannel {
            name: "teams".to_string(),
            calls: calls.clone(),
            fail_first_n: 10,
        });
        let config = NotifyConfig {
            max_attempts: 2,
            retry_base_delay: std::time::Duration::from_millis(1),
            ..NotifyConfig::default()
        };
        let manager = NotificationManager::new(vec![channel], config).unwrap();

        manager.send_security_alert(&sample_event(RiskLevel::Critical)).await;

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        let health = manager.health();
        assert!(!health[0].is_healthy);
        assert_eq!(health[0].failure_count, 1);
    }
}
