use crate::error::CollectorError;

/// Default bounded queue size per channel.
pub const DEFAULT_QUEUE_SIZE: usize = 5_000;
/// Maximum bounded queue size per channel.
pub const MAX_QUEUE_SIZE: usize = 50_000;

/// Typed configuration for an [`crate::EventCollector`].
///
/// Supports hot reload by constructing a fresh `CollectorConfig` and
/// rebuilding the collector; there is no process-wide mutable singleton.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CollectorConfig {
    /// Channel names to tail/replay. Deduplicated case-insensitively by the
    /// collector.
    pub channels: Vec<String>,
    /// XPath-like filter expression applied by each channel reader.
    #[serde(default)]
    pub filter: String,
    /// Poll interval in seconds, must be `>= 0`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Bounded queue size per channel.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            filter: String::new(),
            poll_interval_secs: default_poll_interval(),
            queue_size: default_queue_size(),
        }
    }
}

impl CollectorConfig {
    /// Validate bounds. Called at construction time so misconfiguration
    /// fails fast at startup rather than surfacing mid-run.
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.channels.is_empty() {
            return Err(CollectorError::Config(
                "at least one channel must be configured".into(),
            ));
        }
        if self.queue_size == 0 || self.queue_size > MAX_QUEUE_SIZE {
            return Err(CollectorError::Config(format!(
                "queue_size {} outside (0, {}]",
                self.queue_size, MAX_QUEUE_SIZE
            )));
        }
        Ok(())
    }
}
