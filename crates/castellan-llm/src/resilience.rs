use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use castellan_types::LogEvent;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::LlmError;
use crate::LlmClient;

/// Configuration for [`ResilienceClient`].
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Base retry delay; doubled (with jitter) on each subsequent attempt.
    pub base_delay: Duration,
    /// Maximum number of retries after the initial attempt. Total attempts
    /// = `max_retries + 1`.
    pub max_retries: u32,
    /// Circuit breaker sampling window.
    pub breaker_window: Duration,
    /// Failure ratio, over the sampling window, that opens the breaker.
    pub breaker_failure_ratio: f64,
    /// Minimum samples in the window before the ratio is evaluated.
    pub breaker_min_throughput: usize,
    /// How long the breaker stays open before allowing a half-open probe.
    pub breaker_duration: Duration,
    /// Single-call wall-clock timeout.
    pub call_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_retries: 3,
            breaker_window: Duration::from_secs(30),
            breaker_failure_ratio: 0.5,
            breaker_min_throughput: 5,
            breaker_duration: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Running counters exposed by [`ResilienceClient`].
#[derive(Debug, Default)]
pub struct ResilienceStats {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    retried_calls: AtomicU64,
    circuit_breaker_opens: AtomicU64,
    timeouts: AtomicU64,
}

impl ResilienceStats {
    /// Total top-level `analyze`/`generate` invocations.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
    /// Invocations that ended with a non-empty result.
    pub fn successful_calls(&self) -> u64 {
        self.successful_calls.load(Ordering::Relaxed)
    }
    /// Invocations that ended in terminal failure (empty result).
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::Relaxed)
    }
    /// Number of individual retry attempts issued (not counting the first).
    pub fn retried_calls(&self) -> u64 {
        self.retried_calls.load(Ordering::Relaxed)
    }
    /// Number of times the breaker transitioned to open.
    pub fn circuit_breaker_opens(&self) -> u64 {
        self.circuit_breaker_opens.load(Ordering::Relaxed)
    }
    /// Number of attempts that hit the per-call timeout.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
    /// `successful_calls / total_calls`, or `0.0` when no calls yet.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            0.0
        } else {
            self.successful_calls() as f64 / total as f64
        }
    }
}

/// Retry (exponential backoff + jitter) → circuit breaker → timeout,
/// applied to each `analyze`/`generate` call. Never propagates an error:
/// terminal failures (breaker-open, timeout, retries exhausted, transport)
/// resolve to `Ok(String::new())`.
pub struct ResilienceClient<C> {
    inner: C,
    config: ResilienceConfig,
    breaker: CircuitBreaker,
    stats: ResilienceStats,
}

impl<C: LlmClient> ResilienceClient<C> {
    /// Wrap `inner` with `config`.
    pub fn new(inner: C, config: ResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_window,
            config.breaker_failure_ratio,
            config.breaker_min_throughput,
            config.breaker_duration,
        );
        Self {
            inner,
            config,
            breaker,
            stats: ResilienceStats::default(),
        }
    }

    /// Expose running counters.
    pub fn stats(&self) -> &ResilienceStats {
        &self.stats
    }

    async fn run_with_retries<F, Fut>(&self, cancel: CancellationToken, call: F) -> Result<String, LlmError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<String, LlmError>>,
    {
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                return Err(LlmError::Cancelled);
            }

            if !self.breaker.allow() {
                self.stats.circuit_breaker_opens.fetch_add(1, Ordering::Relaxed);
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                return Ok(String::new());
            }

            let outcome = tokio::select! {
                result = tokio::time::timeout(self.config.call_timeout, call()) => result,
                _ = cancel.cancelled() => {
                    self.breaker.record(false);
                    self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                    return Err(LlmError::Cancelled);
                }
            };

            let should_retry = match outcome {
                Ok(Ok(text)) if !text.is_empty() => {
                    self.breaker.record(true);
                    self.stats.successful_calls.fetch_add(1, Ordering::Relaxed);
                    return Ok(text);
                }
                Ok(Ok(_empty)) => {
                    self.breaker.record(false);
                    true
                }
                Ok(Err(err)) => {
                    warn!(error = %err, "llm call failed");
                    self.breaker.record(false);
                    true
                }
                Err(_elapsed) => {
                    self.breaker.record(false);
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    true
                }
            };

            if !should_retry || attempt >= self.config.max_retries {
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                return Ok(String::new());
            }

            attempt += 1;
            self.stats.retried_calls.fetch_add(1, Ordering::Relaxed);
            let delay = backoff_with_jitter(self.config.base_delay, attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                    return Err(LlmError::Cancelled);
                }
            }
        }
    }
}

fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let exp = base.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0..=(exp / 4).max(1));
    Duration::from_millis(exp + jitter)
}

#[async_trait]
impl<C: LlmClient> LlmClient for ResilienceClient<C> {
    async fn analyze(
        &self,
        event: &LogEvent,
        neighbours: &[LogEvent],
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        self.run_with_retries(cancel.clone(), || {
            self.inner.analyze(event, neighbours, cancel.clone())
        })
        .await
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        self.run_with_retries(cancel.clone(), || {
            self.inner.generate(system_prompt, user_prompt, cancel.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    struct AlwaysFails {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LlmClient for AlwaysFails {
        async fn analyze(
            &self,
            _event: &LogEvent,
            _neighbours: &[LogEvent],
            _cancel: CancellationToken,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(LlmError::Config("boom".into()))
        }
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _cancel: CancellationToken,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(LlmError::Config("boom".into()))
        }
    }

    fn sample_event() -> LogEvent {
        LogEvent::new(
            chrono::Utc::now(),
            "H1",
            "Security",
            1,
            castellan_types::EventLevel::Information,
            "u",
            "m",
            "",
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn all_retries_fail_yields_empty_string_and_expected_counts() {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = AlwaysFails { calls: calls.clone() };
        let config = ResilienceConfig {
            base_delay: Duration::from_millis(1),
            max_retries: 3,
            breaker_failure_ratio: 1.1, // never opens, so all retries run
            breaker_min_throughput: 1000,
            ..ResilienceConfig::default()
        };
        let client = ResilienceClient::new(inner, config);

        let result = client
            .analyze(&sample_event(), &[], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, "");
        assert_eq!(calls.load(Ordering::Relaxed), 4);
        assert_eq!(client.stats().failed_calls(), 1);
        assert_eq!(client.stats().retried_calls(), 3);
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl LlmClient for AlwaysSucceeds {
        async fn analyze(
            &self,
            _event: &LogEvent,
            _neighbours: &[LogEvent],
            _cancel: CancellationToken,
        ) -> Result<String, LlmError> {
            Ok("{}".to_string())
        }
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _cancel: CancellationToken,
        ) -> Result<String, LlmError> {
            Ok("ok".to_string())
        }
    }

    #[tokio::test]
    async fn success_increments_success_rate() {
        let client = ResilienceClient::new(AlwaysSucceeds, ResilienceConfig::default());
        let result = client
            .analyze(&sample_event(), &[], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "{}");
        assert_eq!(client.stats().success_rate(), 1.0);
    }
}
