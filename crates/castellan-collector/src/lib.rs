#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-collector** – produces a lazy, cancellable sequence of raw
//! Windows Event Log records from one or more channels, either by tailing
//! them live with durable bookmarks or by replaying the last 24 hours.

mod bookmark;
mod channel;
mod config;
mod error;

pub use bookmark::{Bookmark, BookmarkStore, FileBookmarkStore, InMemoryBookmarkStore};
pub use channel::EventChannel;
pub use config::CollectorConfig;
pub use error::CollectorError;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use castellan_types::LogEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Reconnect backoff sequence (seconds) applied when a live channel becomes
/// unavailable.
pub const RECONNECT_BACKOFF_SECS: [u64; 5] = [1, 2, 5, 10, 30];

/// Produces lazy, cancellable sequences of `LogEvent` from configured
/// channels.
pub struct EventCollector {
    channels: Vec<Arc<dyn EventChannel>>,
    bookmarks: Arc<dyn BookmarkStore>,
    config: CollectorConfig,
}

impl EventCollector {
    /// Construct a collector over `channels`, deduplicating channel names
    /// case-insensitively and validating `config`.
    pub fn new(
        channels: Vec<Arc<dyn EventChannel>>,
        bookmarks: Arc<dyn BookmarkStore>,
        config: CollectorConfig,
    ) -> Result<Self, CollectorError> {
        config.validate()?;

        let mut seen = HashSet::new();
        let channels = channels
            .into_iter()
            .filter(|c| seen.insert(c.name().to_lowercase()))
            .collect();

        Ok(Self {
            channels,
            bookmarks,
            config,
        })
    }

    /// Tail all configured channels indefinitely, advancing a persisted
    /// bookmark per channel. Reconnects follow [`RECONNECT_BACKOFF_SECS`];
    /// a channel that remains unavailable yields nothing but never
    /// terminates the overall sequence. Stops promptly when `cancel` fires.
    pub fn collect_live(&self, cancel: CancellationToken) -> mpsc::Receiver<LogEvent> {
        let (tx, rx) = mpsc::channel(self.config.queue_size);

        for channel in self.channels.clone() {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let bookmarks = self.bookmarks.clone();
            let poll_interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
            tokio::spawn(async move {
                tail_channel(channel, bookmarks, tx, poll_interval, cancel).await;
            });
        }

        rx
    }

    /// Emit all events for configured channels whose timestamp is within
    /// the last 24 hours, then close the returned receiver. Per-channel
    /// access errors are logged and skipped, never fatal.
    pub fn collect_historical(&self, cancel: CancellationToken) -> mpsc::Receiver<LogEvent> {
        let (tx, rx) = mpsc::channel(self.config.queue_size);
        let channels = self.channels.clone();

        tokio::spawn(async move {
            let since = Utc::now() - chrono::Duration::hours(24);
            for channel in channels {
                if cancel.is_cancelled() {
                    break;
                }
                match channel.poll_historical(since).await {
                    Ok(events) => {
                        for event in events {
                            if cancel.is_cancelled() {
                                break;
                            }
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(channel = channel.name(), error = %err, "historical replay failed, skipping channel");
                    }
                }
            }
        });

        rx
    }
}

#[instrument(skip(channel, bookmarks, tx, cancel), fields(channel = channel.name()))]
async fn tail_channel(
    channel: Arc<dyn EventChannel>,
    bookmarks: Arc<dyn BookmarkStore>,
    tx: mpsc::Sender<LogEvent>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut backoff_idx = 0usize;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let bookmark = match bookmarks.load(channel.name()).await {
            Ok(b) => b,
            Err(err) => {
                warn!(error = %err, "failed to load bookmark, proceeding without one");
                None
            }
        };

        match channel.poll_since(bookmark.as_ref()).await {
            Ok(events) => {
                backoff_idx = 0;
                for event in events {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let new_bookmark = Bookmark::new(event.unique_id.clone(), event.time);
                    if tx.send(event).await.is_err() {
                        return;
                    }
                    if let Err(err) = bookmarks.save(channel.name(), new_bookmark).await {
                        warn!(error = %err, "failed to persist bookmark");
                    }
                }
                debug!("poll cycle complete");
            }
            Err(err) => {
                let delay = RECONNECT_BACKOFF_SECS
                    [backoff_idx.min(RECONNECT_BACKOFF_SECS.len() - 1)];
                warn!(error = %err, delay_secs = delay, "channel unavailable, backing off");
                backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_SECS.len() - 1);
                if wait_or_cancelled(Duration::from_secs(delay), &cancel).await {
                    return;
                }
                continue;
            }
        }

        if wait_or_cancelled(poll_interval, &cancel).await {
            return;
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns true if
/// cancellation won the race.
async fn wait_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => {
            info!("collection cancelled");
            true
        }
    }
}
