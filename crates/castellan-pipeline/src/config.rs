use std::time::Duration;

use crate::error::PipelineError;

/// Default number of long-lived consumer workers pulling from the bounded
/// input queue.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default bounded-queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5_000;

/// Default number of neighbours requested from the retriever per event.
pub const DEFAULT_NEIGHBOURS_K: usize = 5;

/// Default per-event end-to-end deadline.
pub const DEFAULT_EVENT_DEADLINE: Duration = Duration::from_secs(45);

/// Configuration for [`crate::AnalysisPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of consumer workers.
    pub worker_count: usize,
    /// Bounded input queue capacity; on overflow the oldest entry is
    /// dropped and a counter incremented.
    pub queue_capacity: usize,
    /// Neighbours requested per event from the retriever.
    pub neighbours_k: usize,
    /// Wall-clock deadline applied to the whole embed → search → analyze
    /// chain for a single event.
    pub event_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            neighbours_k: DEFAULT_NEIGHBOURS_K,
            event_deadline: DEFAULT_EVENT_DEADLINE,
        }
    }
}

impl PipelineConfig {
    /// Reject obviously-broken configuration before the pipeline starts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.worker_count == 0 {
            return Err(PipelineError::Config("worker_count must be >= 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be >= 1".into()));
        }
        if self.neighbours_k == 0 {
            return Err(PipelineError::Config("neighbours_k must be >= 1".into()));
        }
        if self.event_deadline.is_zero() {
            return Err(PipelineError::Config("event_deadline must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_worker_count_rejected() {
        let config = PipelineConfig {
            worker_count: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
