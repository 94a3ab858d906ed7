use async_trait::async_trait;
use castellan_types::LogEvent;
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::LlmError;
use crate::{render_neighbours, LlmClient};

/// The two model endpoint shapes recognised by the base client, per
/// the local model server's chat/generate contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    /// `POST {endpoint}/api/generate` / `/api/embeddings`-shaped local
    /// server.
    LocalModelServer,
    /// `POST {endpoint}/chat/completions` with Bearer auth.
    RemoteChatApi,
}

impl ModelProvider {
    /// Stable name used in telemetry spans and fingerprints.
    pub fn name(self) -> &'static str {
        match self {
            ModelProvider::LocalModelServer => "local-model-server",
            ModelProvider::RemoteChatApi => "remote-chat-api",
        }
    }
}

/// Configuration for [`BaseLlmClient`].
#[derive(Clone)]
pub struct BaseLlmConfig {
    /// Base endpoint URL.
    pub endpoint: String,
    /// Which provider contract to speak.
    pub provider: ModelProvider,
    /// Model name.
    pub model: String,
    /// Bearer token, required for [`ModelProvider::RemoteChatApi`].
    pub api_key: Option<Secret<String>>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Max tokens to generate (`num_predict` for the local server).
    pub max_tokens: u32,
    /// Nucleus sampling parameter.
    pub top_p: f32,
    /// Top-k sampling parameter.
    pub top_k: u32,
}

impl Default for BaseLlmConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            provider: ModelProvider::LocalModelServer,
            model: String::new(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 512,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

const ANALYSIS_SYSTEM_PROMPT: &str = "You are a Windows security event triage analyst. \
Respond with a single JSON object containing exactly the fields: risk (one of low, medium, \
high, critical), mitre (array of ATT&CK technique ids), confidence (integer 0-100), summary \
(10-500 character string), recommended_actions (array of strings). Respond with JSON only.";

/// Transport to a model endpoint. Builds the templated analysis prompt
/// (new event plus up to K neighbours) and the free-form generate prompt.
pub struct BaseLlmClient {
    client: reqwest::Client,
    config: BaseLlmConfig,
}

impl BaseLlmClient {
    /// Construct a new base client from `config`.
    pub fn new(config: BaseLlmConfig) -> Result<Self, LlmError> {
        if config.endpoint.is_empty() {
            return Err(LlmError::Config("endpoint must not be empty".into()));
        }
        if config.provider == ModelProvider::RemoteChatApi && config.api_key.is_none() {
            return Err(LlmError::Config(
                "remote-chat-api requires an api_key".into(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    fn build_analysis_prompt(&self, event: &LogEvent, neighbours: &[LogEvent]) -> String {
        let neighbour_block = render_neighbours(neighbours);
        format!(
            "New event:\n{} [{}/{}] user={} message={}\n\nNeighbouring events:\n{}",
            event.time.to_rfc3339(),
            event.channel,
            event.event_id,
            event.user,
            event.message,
            if neighbour_block.is_empty() {
                "(none)".to_string()
            } else {
                neighbour_block
            }
        )
    }

    async fn call_local_generate(&self, system: &str, user: &str) -> Result<Value, LlmError> {
        let prompt = format!("{system}\n\n{user}");
        let response = self
            .client
            .post(format!("{}/api/generate", self.config.endpoint))
            .json(&json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": self.config.temperature,
                    "num_predict": self.config.max_tokens,
                    "top_p": self.config.top_p,
                    "top_k": self.config.top_k,
                }
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    async fn call_remote_chat(&self, system: &str, user: &str) -> Result<Value, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .expect("validated at construction time");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .bearer_auth(api_key.expose_secret())
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
                "temperature": self.config.temperature,
                "max_tokens": self.config.max_tokens,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    async fn call(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = match self.config.provider {
            ModelProvider::LocalModelServer => self.call_local_generate(system, user).await?,
            ModelProvider::RemoteChatApi => self.call_remote_chat(system, user).await?,
        };

        let text = match self.config.provider {
            ModelProvider::LocalModelServer => body.get("response").and_then(Value::as_str),
            ModelProvider::RemoteChatApi => body
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str),
        };

        match text {
            Some(text) => Ok(text.to_string()),
            None => {
                warn!("model response envelope missing expected field");
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl LlmClient for BaseLlmClient {
    #[instrument(skip(self, event, neighbours, cancel), fields(provider = self.config.provider.name(), model = %self.config.model, event_id = event.event_id))]
    async fn analyze(
        &self,
        event: &LogEvent,
        neighbours: &[LogEvent],
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        let user_prompt = self.build_analysis_prompt(event, neighbours);
        tokio::select! {
            result = self.call(ANALYSIS_SYSTEM_PROMPT, &user_prompt) => result,
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
        }
    }

    #[instrument(skip(self, system_prompt, user_prompt, cancel), fields(provider = self.config.provider.name(), model = %self.config.model))]
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cancel: CancellationToken,
    ) -> Result<String, LlmError> {
        tokio::select! {
            result = self.call(system_prompt, user_prompt) => result,
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
        }
    }
}
