use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CollectorError;

/// Opaque per-channel progress marker: the last event id observed and when
/// it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    /// `unique_id` of the last event consumed from this channel.
    pub last_event_id: String,
    /// `time` of the last event consumed.
    pub last_event_time: DateTime<Utc>,
}

impl Bookmark {
    /// Construct a bookmark for `last_event_id` observed at `last_event_time`.
    pub fn new(last_event_id: String, last_event_time: DateTime<Utc>) -> Self {
        Self {
            last_event_id,
            last_event_time,
        }
    }
}

/// Durable storage for per-channel bookmarks, one opaque blob per channel.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Load the bookmark for `channel`, if any has been recorded.
    async fn load(&self, channel: &str) -> Result<Option<Bookmark>, CollectorError>;

    /// Persist `bookmark` for `channel`, overwriting any prior value.
    async fn save(&self, channel: &str, bookmark: Bookmark) -> Result<(), CollectorError>;
}

/// In-memory bookmark store. Bookmarks do not survive process restart;
/// suitable for tests and for deployments that accept replaying from the
/// historical window on restart.
#[derive(Default)]
pub struct InMemoryBookmarkStore {
    bookmarks: Arc<RwLock<HashMap<String, Bookmark>>>,
}

impl InMemoryBookmarkStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookmarkStore for InMemoryBookmarkStore {
    async fn load(&self, channel: &str) -> Result<Option<Bookmark>, CollectorError> {
        Ok(self.bookmarks.read().await.get(channel).cloned())
    }

    async fn save(&self, channel: &str, bookmark: Bookmark) -> Result<(), CollectorError> {
        self.bookmarks
            .write()
            .await
            .insert(channel.to_string(), bookmark);
        Ok(())
    }
}

/// File-backed bookmark store: one JSON file per channel under `dir`, with
/// scoped acquisition and guaranteed release on every exit path (no handle
/// is held between calls).
pub struct FileBookmarkStore {
    dir: PathBuf,
}

impl FileBookmarkStore {
    /// Use `dir` as the bookmark directory, creating it if absent.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, CollectorError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, channel: &str) -> PathBuf {
        let safe_name: String = channel
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe_name}.bookmark.json"))
    }
}

#[async_trait]
impl BookmarkStore for FileBookmarkStore {
    async fn load(&self, channel: &str) -> Result<Option<Bookmark>, CollectorError> {
        let path = self.path_for(channel);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, channel: &str, bookmark: Bookmark) -> Result<(), CollectorError> {
        let path = self.path_for(channel);
        let bytes = serde_json::to_vec(&bookmark)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }
}
