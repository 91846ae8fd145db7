//! Outbound reply delivery back to the messaging platform.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, contact_id: &str, text: &str) -> Result<()>;
}

/// Sends replies through a LeadConnector-style conversations API.
#[derive(Clone)]
pub struct HttpReplySender {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    api_version: String,
}

impl HttpReplySender {
    pub fn new(api_url: &str, api_key: &str, api_version: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            api_version: api_version.to_string(),
        }
    }
}

#[async_trait]
impl ReplySender for HttpReplySender {
    #[tracing::instrument(level = "info", skip(self, text))]
    async fn send(&self, contact_id: &str, text: &str) -> Result<()> {
        let payload = serde_json::json!({
            "type": "SMS",
            "contactId": contact_id,
            "message": text,
        });

        let response = self
            .http
            .post(&self.api_url)
            .timeout(SEND_TIMEOUT)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .header("Version", &self.api_version)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("send reply status={status} body={body}"));
        }
        tracing::info!(contact = %contact_id, "reply delivered");
        Ok(())
    }
}

/// Dev-mode sender: logs the reply instead of delivering it.
#[derive(Debug, Default, Clone)]
pub struct LogReplySender;

#[async_trait]
impl ReplySender for LogReplySender {
    async fn send(&self, contact_id: &str, text: &str) -> Result<()> {
        tracing::info!(contact = %contact_id, reply = %text, "reply (log delivery mode)");
        Ok(())
    }
}
