//! Forwards inbound messages to an HTTP endpoint.

use std::time::Duration;

use {
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    serde::Serialize,
    tracing::{debug, warn},
    zaapi_channels::InboundMessage,
    zaapi_config::WebhookConfig,
    zaapi_sessions::MessageSink,
};

const BASE_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    session_id: &'a str,
    message: &'a InboundMessage,
}

/// POSTs every inbound message as JSON, retrying with exponential backoff.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    retries: u32,
    backoff: Duration,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration, retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            retries,
            backoff: BASE_BACKOFF,
        })
    }

    /// `None` when the webhook is disabled or has no URL.
    pub fn from_config(config: &WebhookConfig) -> Result<Option<Self>> {
        config
            .active_url()
            .map(|url| Self::new(url, Duration::from_secs(config.timeout_secs.max(1)), config.retries))
            .transpose()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn post_once(&self, payload: &WebhookPayload<'_>) -> Result<()> {
        self.client
            .post(&self.url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl MessageSink for WebhookSink {
    async fn deliver(&self, session_id: &str, message: &InboundMessage) -> Result<()> {
        let payload = WebhookPayload {
            event: "message",
            session_id,
            message,
        };

        let mut last_error = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * 2u32.saturating_pow(attempt - 1)).await;
            }
            match self.post_once(&payload).await {
                Ok(()) => {
                    debug!(session = %session_id, message_id = %message.id, attempt, "webhook delivered");
                    return Ok(());
                },
                Err(e) => {
                    warn!(session = %session_id, attempt, error = %e, "webhook delivery failed");
                    last_error = Some(e);
                },
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("webhook delivery failed")))
            .with_context(|| format!("giving up on webhook after {} attempts", self.retries + 1))
    }
}
