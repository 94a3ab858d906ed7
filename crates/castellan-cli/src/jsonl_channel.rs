//! A file-backed [`EventChannel`]: reads newline-delimited [`LogEvent`] JSON
//! from `<dir>/<channel>.jsonl`.
//!
//! No production event-log reader ships in this workspace — the OS event
//! log API is an external collaborator the collector crate deliberately
//! stays ignorant of. This implementation exists so `run`/`replay` have
//! something concrete to drive: an operator (or a test harness) appends one
//! JSON-serialized `LogEvent` per line and this channel tails or replays it
//! the same way a live channel would.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use castellan_collector::{Bookmark, CollectorError, EventChannel};
use castellan_types::LogEvent;
use chrono::{DateTime, Utc};

/// Reads `LogEvent`s from `<dir>/<channel>.jsonl`, one JSON object per line.
pub struct JsonlEventChannel {
    name: String,
    path: PathBuf,
}

impl JsonlEventChannel {
    /// Construct a channel named `name` backed by `<dir>/<name>.jsonl`.
    pub fn new(name: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        let name = name.into();
        let safe_name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let path = dir.as_ref().join(format!("{safe_name}.jsonl"));
        Self { name, path }
    }

    async fn read_all(&self) -> Result<Vec<LogEvent>, CollectorError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let text = String::from_utf8_lossy(&bytes);
        let mut events = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            events.push(serde_json::from_str::<LogEvent>(line)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventChannel for JsonlEventChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_since(&self, bookmark: Option<&Bookmark>) -> Result<Vec<LogEvent>, CollectorError> {
        let events = self.read_all().await?;
        let cutoff = bookmark.map(|b| b.last_event_time);
        Ok(events
            .into_iter()
            .filter(|e| cutoff.map(|c| e.time > c).unwrap_or(true))
            .collect())
    }

    async fn poll_historical(&self, since: DateTime<Utc>) -> Result<Vec<LogEvent>, CollectorError> {
        let events = self.read_all().await?;
        Ok(events.into_iter().filter(|e| e.time >= since).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::EventLevel;

    fn sample(minutes_ago: i64) -> LogEvent {
        LogEvent::new(
            Utc::now() - chrono::Duration::minutes(minutes_ago),
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

    #[tokio::test]
    async fn missing_file_yields_empty_events() {
        let dir = tempfile::tempdir().unwrap();
        let channel = JsonlEventChannel::new("Security", dir.path());
        assert!(channel.poll_since(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_since_respects_bookmark_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let channel = JsonlEventChannel::new("Security", dir.path());
        let events = vec![sample(30), sample(5)];
        let lines: String = events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        tokio::fs::write(dir.path().join("Security.jsonl"), lines)
            .await
            .unwrap();

        let bookmark = Bookmark::new("x".into(), Utc::now() - chrono::Duration::minutes(20));
        let since = channel.poll_since(Some(&bookmark)).await.unwrap();
        assert_eq!(since.len(), 1);
    }

    #[tokio::test]
    async fn poll_historical_filters_by_24h_window() {
        let dir = tempfile::tempdir().unwrap();
        let channel = JsonlEventChannel::new("Security", dir.path());
        let events = vec![sample(10), sample(60 * 30)];
        let lines: String = events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        tokio::fs::write(dir.path().join("Security.jsonl"), lines)
            .await
            .unwrap();

        let since = Utc::now() - chrono::Duration::hours(24);
        let historical = channel.poll_historical(since).await.unwrap();
        assert_eq!(historical.len(), 1);
    }
}
