use async_trait::async_trait;
use castellan_types::SecurityEvent;
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use tracing::instrument;
use url::Url;

use crate::error::NotifyError;
use crate::templates::render_summary;

use super::{validate_webhook_host, ChannelDriver};

const ALLOWED_HOSTS: &[&str] = &["outlook.office.com", "teams.microsoft.com"];

/// Microsoft Teams incoming-webhook channel. Renders events as a minimal
/// `MessageCard` payload.
pub struct TeamsChannel {
    name: String,
    webhook: Secret<String>,
    client: reqwest::Client,
}

impl TeamsChannel {
    /// Construct a channel posting to `webhook_url`, rejecting hosts outside
    /// Microsoft's incoming-webhook domains.
    pub fn new(name: impl Into<String>, webhook_url: impl Into<String>) -> Result<Self, NotifyError> {
        let webhook_url = webhook_url.into();
        let parsed = Url::parse(&webhook_url)?;
        validate_webhook_host(&parsed, ALLOWED_HOSTS)?;
        Ok(Self {
            name: name.into(),
            webhook: Secret::new(webhook_url),
            client: reqwest::Client::new(),
        })
    }

    fn card(&self, text: &str) -> serde_json::Value {
        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "summary": "Castellan security alert",
            "text": text,
        })
    }
}

#[async_trait]
impl ChannelDriver for TeamsChannel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, event), fields(channel = %self.name))]
    async fn send(&self, event: &SecurityEvent) -> Result<(), NotifyError> {
        let body = self.card(&render_summary(event));
        self.client
            .post(self.webhook.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %self.name))]
    async fn test_connection(&self) -> Result<(), NotifyError> {
        let body = self.card("Castellan connectivity check");
        self.client
            .post(self.webhook.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
