use std::time::Duration;

use async_trait::async_trait;
use castellan_types::Embedding;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::EmbedderError;
use crate::Embedder;

/// Default per-call timeout for embedding requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for [`HttpEmbedder`].
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    /// Base endpoint, e.g. `"http://localhost:11434"`.
    pub endpoint: String,
    /// Provider identifier, e.g. `"local-model-server"`.
    pub provider: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl Default for HttpEmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            provider: "local-model-server".to_string(),
            model: String::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

/// Embeds text by POSTing to a configured model endpoint's
/// `/api/embeddings`-shaped contract.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: HttpEmbedderConfig,
}

impl HttpEmbedder {
    /// Construct a new embedder from `config`.
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, EmbedderError> {
        if config.endpoint.is_empty() {
            return Err(EmbedderError::Config("endpoint must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(EmbedderError::Transport)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    #[instrument(skip(self, text, cancel), fields(provider = %self.config.provider, model = %self.config.model))]
    async fn embed(&self, text: &str, cancel: CancellationToken) -> Result<Embedding, EmbedderError> {
        let request = self
            .client
            .post(format!("{}/api/embeddings", self.config.endpoint))
            .json(&EmbedRequest {
                model: &self.config.model,
                prompt: text,
            })
            .send();

        let response = tokio::select! {
            result = request => result?,
            _ = cancel.cancelled() => return Err(EmbedderError::Cancelled),
        };

        let response = response.error_for_status()?;

        let body: Result<Value, _> = response.json().await;
        let body = match body {
            Ok(b) => b,
            Err(err) => {
                warn!(error = %err, "embedding response was not valid JSON");
                return Ok(Vec::new());
            }
        };

        let embedding = body
            .get("embedding")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(embedding)
    }

    fn provider_name(&self) -> &str {
        &self.config.provider
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_response_returns_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [0.1, 0.2, 0.3]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: server.uri(),
            model: "llama3".into(),
            ..Default::default()
        })
        .unwrap();

        let result = embedder
            .embed("hello", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn malformed_json_yields_empty_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: server.uri(),
            model: "llama3".into(),
            ..Default::default()
        })
        .unwrap();

        let result = embedder
            .embed("hello", CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: server.uri(),
            model: "llama3".into(),
            ..Default::default()
        })
        .unwrap();

        let result = embedder.embed("hello", CancellationToken::new()).await;
        assert!(matches!(result, Err(EmbedderError::Transport(_))));
    }

    #[tokio::test]
    async fn cancellation_is_signalled_not_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: server.uri(),
            model: "llama3".into(),
            timeout: Duration::from_secs(30),
            ..Default::default()
        })
        .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = embedder.embed("hello", cancel).await;
        assert!(matches!(result, Err(EmbedderError::Cancelled)));
    }
}
