//! On-disk configuration plus a secure environment-variable overlay for
//! secrets. The TOML file holds everything that is safe to commit;
//! `Secrets` holds everything that is not, cached in a zeroize-on-drop map
//! the same way `toka-llm-gateway`'s `EnvLoader` does.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use castellan_collector::CollectorConfig;
use castellan_embedder::HttpEmbedderConfig;
use castellan_llm::{BaseLlmConfig, ModelProvider, ResilienceConfig, StrictJsonConfig};
use castellan_notify::NotifyConfig;
use castellan_pipeline::PipelineConfig;
use castellan_vectorstore::{HybridConfig, VectorStoreConfig};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::debug;

/// Top-level on-disk configuration. Library config types that already
/// derive `Deserialize` (`CollectorConfig`, `VectorStoreConfig`,
/// `HybridConfig`) are embedded directly; the rest are read through small
/// raw mirrors below, since their upstream types carry non-serde fields
/// (durations, `Secret<String>`) or intentionally expose no serde impl.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Directory `run`/`replay` read JSONL event files from and persist
    /// bookmarks under.
    pub data_dir: String,
    pub collector: CollectorConfig,
    #[serde(default)]
    pub embedder: RawEmbedderConfig,
    pub vectorstore: VectorStoreConfig,
    #[serde(default)]
    pub hybrid: HybridConfig,
    pub llm: RawLlmConfig,
    #[serde(default)]
    pub pipeline: RawPipelineConfig,
    #[serde(default)]
    pub notify: RawNotifyConfig,
}

impl RawConfig {
    /// Load and parse `path` as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        toml::from_str(&text).with_context(|| "parsing config TOML".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEmbedderConfig {
    pub endpoint: String,
    #[serde(default = "default_embedder_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default = "default_embedder_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_embedder_provider() -> String {
    "local-model-server".to_string()
}
fn default_embedder_timeout_secs() -> u64 {
    15
}
fn default_cache_capacity() -> usize {
    10_000
}
fn default_cache_ttl_secs() -> u64 {
    600
}

impl Default for RawEmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            provider: default_embedder_provider(),
            model: String::new(),
            timeout_secs: default_embedder_timeout_secs(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl RawEmbedderConfig {
    pub fn to_embedder_config(&self) -> HttpEmbedderConfig {
        HttpEmbedderConfig {
            endpoint: self.endpoint.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn cache_params(&self) -> (usize, Duration) {
        (self.cache_capacity, Duration::from_secs(self.cache_ttl_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLlmConfig {
    pub endpoint: String,
    /// `"local"` (`ModelProvider::LocalModelServer`) or `"remote"`
    /// (`ModelProvider::RemoteChatApi`).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default)]
    pub resilience: RawResilienceConfig,
    #[serde(default)]
    pub strict_json: RawStrictJsonConfig,
}

fn default_llm_provider() -> String {
    "local".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    512
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    40
}

impl RawLlmConfig {
    pub fn to_base_config(&self, api_key: Option<Secret<String>>) -> Result<BaseLlmConfig> {
        let provider = match self.provider.as_str() {
            "local" => ModelProvider::LocalModelServer,
            "remote" => ModelProvider::RemoteChatApi,
            other => anyhow::bail!("unknown llm provider {other:?}, expected \"local\" or \"remote\""),
        };
        Ok(BaseLlmConfig {
            endpoint: self.endpoint.clone(),
            provider,
            model: self.model.clone(),
            api_key,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawResilienceConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_breaker_window_secs")]
    pub breaker_window_secs: u64,
    #[serde(default = "default_breaker_failure_ratio")]
    pub breaker_failure_ratio: f64,
    #[serde(default = "default_breaker_min_throughput")]
    pub breaker_min_throughput: usize,
    #[serde(default = "default_breaker_duration_secs")]
    pub breaker_duration_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_retries() -> u32 {
    3
}
fn default_breaker_window_secs() -> u64 {
    30
}
fn default_breaker_failure_ratio() -> f64 {
    0.5
}
fn default_breaker_min_throughput() -> usize {
    5
}
fn default_breaker_duration_secs() -> u64 {
    30
}
fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for RawResilienceConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
            breaker_window_secs: default_breaker_window_secs(),
            breaker_failure_ratio: default_breaker_failure_ratio(),
            breaker_min_throughput: default_breaker_min_throughput(),
            breaker_duration_secs: default_breaker_duration_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RawResilienceConfig {
    pub fn to_resilience_config(&self) -> ResilienceConfig {
        ResilienceConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_retries: self.max_retries,
            breaker_window: Duration::from_secs(self.breaker_window_secs),
            breaker_failure_ratio: self.breaker_failure_ratio,
            breaker_min_throughput: self.breaker_min_throughput,
            breaker_duration: Duration::from_secs(self.breaker_duration_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStrictJsonConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default)]
    pub min_confidence: u8,
}

fn default_true() -> bool {
    true
}
fn default_max_retry_attempts() -> u32 {
    1
}

impl Default for RawStrictJsonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_on_failure: true,
            max_retry_attempts: default_max_retry_attempts(),
            min_confidence: 0,
        }
    }
}

impl RawStrictJsonConfig {
    pub fn to_strict_json_config(&self) -> StrictJsonConfig {
        StrictJsonConfig {
            enabled: self.enabled,
            retry_on_failure: self.retry_on_failure,
            max_retry_attempts: self.max_retry_attempts,
            min_confidence: self.min_confidence,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_neighbours_k")]
    pub neighbours_k: usize,
    #[serde(default = "default_event_deadline_secs")]
    pub event_deadline_secs: u64,
}

fn default_worker_count() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    5_000
}
fn default_neighbours_k() -> usize {
    5
}
fn default_event_deadline_secs() -> u64 {
    45
}

impl Default for RawPipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            neighbours_k: default_neighbours_k(),
            event_deadline_secs: default_event_deadline_secs(),
        }
    }
}

impl RawPipelineConfig {
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            neighbours_k: self.neighbours_k,
            event_deadline: Duration::from_secs(self.event_deadline_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNotifyConfig {
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
    #[serde(default = "default_rate_limit_period_secs")]
    pub rate_limit_period_secs: u64,
    #[serde(default = "default_notify_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
    /// Teams/Slack webhook channels to register, by name. The webhook URL
    /// itself is never read from this file — see [`Secrets`].
    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_rate_limit_burst() -> u32 {
    10
}
fn default_rate_limit_period_secs() -> u64 {
    300
}
fn default_notify_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_secs() -> u64 {
    1
}

impl Default for RawNotifyConfig {
    fn default() -> Self {
        Self {
            rate_limit_burst: default_rate_limit_burst(),
            rate_limit_period_secs: default_rate_limit_period_secs(),
            max_attempts: default_notify_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            channels: Vec::new(),
        }
    }
}

impl RawNotifyConfig {
    pub fn to_notify_config(&self) -> NotifyConfig {
        NotifyConfig {
            rate_limit_burst: self.rate_limit_burst,
            rate_limit_period: Duration::from_secs(self.rate_limit_period_secs),
            max_attempts: self.max_attempts,
            retry_base_delay: Duration::from_secs(self.retry_base_delay_secs),
        }
    }
}

/// Secure environment-variable cache for secrets the TOML file must never
/// carry: the LLM API key and channel webhook URLs. Zeroized on drop.
pub struct Secrets {
    env_cache: HashMap<String, Secret<String>>,
}

const SECRET_ENV_VARS: &[&str] = &[
    "CASTELLAN_LLM_API_KEY",
    "CASTELLAN_TEAMS_WEBHOOK_URL",
    "CASTELLAN_SLACK_WEBHOOK_URL",
];

impl Secrets {
    /// Load every recognised secret environment variable into a secure
    /// cache.
    pub fn load() -> Self {
        let mut env_cache = HashMap::new();
        for var in SECRET_ENV_VARS {
            if let Ok(value) = env::var(var) {
                env_cache.insert(var.to_string(), Secret::new(value));
            }
        }
        debug!(count = env_cache.len(), "loaded secrets from environment");
        Self { env_cache }
    }

    /// The LLM endpoint's bearer token, if configured.
    pub fn llm_api_key(&self) -> Option<Secret<String>> {
        self.env_cache
            .get("CASTELLAN_LLM_API_KEY")
            .map(|s| Secret::new(s.expose_secret().clone()))
    }

    /// The Teams incoming-webhook URL, if configured.
    pub fn teams_webhook_url(&self) -> Option<String> {
        self.env_cache
            .get("CASTELLAN_TEAMS_WEBHOOK_URL")
            .map(|s| s.expose_secret().clone())
    }

    /// The Slack incoming-webhook URL, if configured.
    pub fn slack_webhook_url(&self) -> Option<String> {
        self.env_cache
            .get("CASTELLAN_SLACK_WEBHOOK_URL")
            .map(|s| s.expose_secret().clone())
    }
}

impl Drop for Secrets {
    fn drop(&mut self) {
        self.env_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_parses_minimal_toml() {
        let text = r#"
data_dir = "./data"

[collector]
channels = ["Security"]

[vectorstore]
endpoint = "http://localhost:6333"
collection = "castellan"
dimension = 768
distance = "Cosine"

[llm]
endpoint = "http://localhost:11434"
model = "llama3"
"#;
        let config: RawConfig = toml::from_str(text).unwrap();
        assert_eq!(config.collector.channels, vec!["Security".to_string()]);
        assert_eq!(config.pipeline.worker_count, 4);
        assert!(config.notify.channels.is_empty());
    }

    #[test]
    fn unknown_llm_provider_is_rejected() {
        let raw = RawLlmConfig {
            endpoint: "http://localhost".into(),
            provider: "carrier-pigeon".into(),
            model: "m".into(),
            temperature: 0.2,
            max_tokens: 10,
            top_p: 0.9,
            top_k: 40,
            resilience: RawResilienceConfig::default(),
            strict_json: RawStrictJsonConfig::default(),
        };
        assert!(raw.to_base_config(None).is_err());
    }
}
