use std::time::Instant;

use async_trait::async_trait;
use castellan_types::LogEvent;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Span};

use crate::error::LlmError;
use crate::LlmClient;

/// Wraps the inner client with one tracing span per call, tagged with
/// operation name, provider name (the inner type's name), event id,
/// channel, host, neighbour count, result length, and wall-clock duration.
/// Never suppresses errors: on failure the span is marked as error and the
/// error is rethrown.
///
/// Per the preserved pass-through design decision for the ensemble's
/// `generate` path, this layer applies identically whether or not an
/// [`crate::EnsembleClient`] sits above it — `generate` always gets a
/// single span, never per-model spans.
pub struct TelemetryClient<C> {
    inner: C,
    provider_name: &'static str,
    capture_text: bool,
    max_captured_len: usize,
}

impl<C: LlmClient> TelemetryClient<C> {
    /// Wrap `inner`, tagging spans with `provider_name` (the inner client's
    /// identity, e.g. `"resilience(local-model-server)"`).
    pub fn new(inner: C, provider_name: &'static str) -> Self {
        Self {
            inner,
            provider_name,
            capture_text: false,
            max_captured_len: 0,
        }
    }

    /// Enable capturing prompt/response text (truncated to `max_len`) on
    /// the span. Off by default.
    pub fn with_text_capture(mut self, max_len: usize) -> Self {
        self.capture_text = true;
        self.max_captured_len = max_len;
        self
    }

    fn record_result(&self, span: &Span, start: Instant, result: &Result<String, LlmError>) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        span.record("duration_ms", elapsed_ms);
        match result {
            Ok(text) => {
                span.record("result_len", text.len());
                if self.capture_text {
                    let truncated: String = text.chars().take(self.max_captured_len).collect();
                    span.record("result_text", tracing::field::display(truncated));
                }
            }
            Err(err) => {
                span.record("error", tracing::field::display(err));
            }
        }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for TelemetryClient<C> {
    #[instrument(
        name = "security_analysis",
        skip(self, event, neighbours, cancel),
        fields(
            provider = self.provider_name,
            event_id = event.event_id,
            channel = %event.channel,
            host = %event.host,
            neighbours = neighbours.len(),
            duration_ms = tracing::field::Empty,
            result_len = tracing::field::Empty,
            result_text = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    )]
    async fn analyze(
        &self,
        event: &LogEvent,
        neighbours: &[LogEvent],
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        let start = Instant::now();
        let result = self.inner.analyze(event, neighbours, cancel).await;
        self.record_result(&Span::current(), start, &result);
        result
    }

    #[instrument(
        name = "chat_generation",
        skip(self, system_prompt, user_prompt, cancel),
        fields(
            provider = self.provider_name,
            duration_ms = tracing::field::Empty,
            result_len = tracing::field::Empty,
            result_text = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    )]
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        let start = Instant::now();
        let result = self.inner.generate(system_prompt, user_prompt, cancel).await;
        self.record_result(&Span::current(), start, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl LlmClient for Echo {
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
    async fn wraps_result_unchanged() {
        let client = TelemetryClient::new(Echo, "test-provider");
        let event = LogEvent::new(
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
        .unwrap();
        let result = client.analyze(&event, &[], CancellationToken::new()).await.unwrap();
        assert_eq!(result, "{}");
    }
}
