mod slack;
mod teams;

pub use slack::SlackChannel;
pub use teams::TeamsChannel;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use castellan_types::SecurityEvent;
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::NotifyError;

/// A delivery target a `SecurityEvent` can be rendered and sent to.
#[async_trait]
pub trait ChannelDriver: Send + Sync {
    /// Stable name used as the throttle/rate-limit and health-tracking key.
    fn name(&self) -> &str;

    /// Render and deliver `event` over this channel's transport.
    async fn send(&self, event: &SecurityEvent) -> Result<(), NotifyError>;

    /// Send a minimal probe payload to confirm the webhook is reachable.
    async fn test_connection(&self) -> Result<(), NotifyError>;
}

/// Reject a webhook URL whose host is not on `allowed_hosts`, mirroring the
/// provider-side host pinning a webhook transport needs before it will ever
/// dial out.
pub fn validate_webhook_host(url: &Url, allowed_hosts: &[&str]) -> Result<(), NotifyError> {
    let host = url.host_str().unwrap_or("");
    if allowed_hosts.iter().any(|allowed| *allowed == host) {
        Ok(())
    } else {
        Err(NotifyError::HostNotAllowed(host.to_string()))
    }
}

/// Point-in-time health snapshot for a channel, as reported by
/// [`ChannelHealth::snapshot`].
#[derive(Debug, Clone)]
pub struct ChannelHealthSnapshot {
    /// Name of the channel this snapshot describes.
    pub channel: String,
    /// False once the most recent delivery attempt failed.
    pub is_healthy: bool,
    /// Instant of the most recent delivery attempt, if any.
    pub last_check_time: Option<DateTime<Utc>>,
    /// Error message from the most recent failed attempt, if any.
    pub last_error: Option<String>,
    /// Total successful deliveries.
    pub success_count: u64,
    /// Total failed deliveries.
    pub failure_count: u64,
}

/// Running health counters the notification manager keeps per channel,
/// independent of the driver itself so drivers stay stateless transports.
#[derive(Debug, Default)]
pub struct ChannelHealth {
    is_healthy: AtomicBool,
    last_check_time: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl ChannelHealth {
    /// A channel with no recorded attempts yet, assumed healthy.
    pub fn new() -> Self {
        Self {
            is_healthy: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Record a successful delivery at `now`.
    pub fn record_success(&self, now: DateTime<Utc>) {
        self.is_healthy.store(true, Ordering::Relaxed);
        *self.last_check_time.lock().unwrap() = Some(now);
        *self.last_error.lock().unwrap() = None;
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed delivery at `now` with the given error message.
    pub fn record_failure(&self, now: DateTime<Utc>, error: impl Into<String>) {
        self.is_healthy.store(false, Ordering::Relaxed);
        *self.last_check_time.lock().unwrap() = Some(now);
        *self.last_error.lock().unwrap() = Some(error.into());
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Immutable snapshot of the current counters for `channel`.
    pub fn snapshot(&self, channel: &str) -> ChannelHealthSnapshot {
        ChannelHealthSnapshot {
            channel: channel.to_string(),
            is_healthy: self.is_healthy.load(Ordering::Relaxed),
            last_check_time: *self.last_check_time.lock().unwrap(),
            last_error: self.last_error.lock().unwrap().clone(),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }
}
