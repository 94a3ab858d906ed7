use async_trait::async_trait;
use castellan_types::LogEvent;
use chrono::{DateTime, Utc};

use crate::bookmark::Bookmark;
use crate::error::CollectorError;

/// Abstraction over a single Windows Event Log channel (e.g. `"Security"`).
///
/// The concrete implementation backing a live channel is an external
/// collaborator (the OS event log API); this trait exists so the collector
/// itself has no platform dependency and can be driven by fakes in tests.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Channel name as configured, e.g. `"Security"`.
    fn name(&self) -> &str;

    /// Fetch events newer than `bookmark` (or all available events if
    /// `bookmark` is `None`), applying the channel's filter expression.
    async fn poll_since(&self, bookmark: Option<&Bookmark>) -> Result<Vec<LogEvent>, CollectorError>;

    /// Fetch all events with `time >= since`, applying the channel's filter
    /// expression. Used by historical replay.
    async fn poll_historical(&self, since: DateTime<Utc>) -> Result<Vec<LogEvent>, CollectorError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory channel fixture used across this workspace's collector and
    /// pipeline tests.
    pub struct FakeChannel {
        name: String,
        events: Mutex<Vec<LogEvent>>,
    }

    impl FakeChannel {
        pub fn new(name: impl Into<String>, events: Vec<LogEvent>) -> Self {
            Self {
                name: name.into(),
                events: Mutex::new(events),
            }
        }
    }

    #[async_trait]
    impl EventChannel for FakeChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn poll_since(
            &self,
            bookmark: Option<&Bookmark>,
        ) -> Result<Vec<LogEvent>, CollectorError> {
            let events = self.events.lock().unwrap();
            let cutoff = bookmark.map(|b| b.last_event_time);
            Ok(events
                .iter()
                .filter(|e| cutoff.map(|c| e.time > c).unwrap_or(true))
                .cloned()
                .collect())
        }

        async fn poll_historical(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<LogEvent>, CollectorError> {
            let events = self.events.lock().unwrap();
            Ok(events.iter().filter(|e| e.time >= since).cloned().collect())
        }
    }
}
