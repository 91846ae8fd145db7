//! PostgREST-style HTTP store.
//!
//! Rows live in `messages` and `contacts` tables exposed under
//! `{base}/rest/v1`. Writes use a short timeout so a slow storage backend
//! can never stall the reply pipeline for long.

use crate::error::{Result, StoreError};
use crate::traits::MessageStore;
use crate::types::{ContactProfile, MessageKind, StoredMessage};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl MessageStore for RestStore {
    #[tracing::instrument(level = "debug", skip(self, body, metadata))]
    async fn append_message(
        &self,
        contact_id: &str,
        body: &str,
        kind: MessageKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        let row = StoredMessage {
            contact_id: contact_id.to_string(),
            body: body.to_string(),
            kind,
            created_at: Utc::now(),
            metadata,
        };

        let response = self
            .authed(self.http.post(self.table_url("messages")))
            .timeout(WRITE_TIMEOUT)
            .json(&row)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Http(format!(
                "append message status={status} body={body}"
            )));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_history(&self, contact_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let response = self
            .authed(self.http.get(self.table_url("messages")))
            .timeout(READ_TIMEOUT)
            .query(&[
                ("contact_id", format!("eq.{contact_id}")),
                ("order", "created_at.asc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Http(format!(
                "get history status={status} body={body}"
            )));
        }

        let messages: Vec<StoredMessage> = serde_json::from_str(&body)?;
        tracing::debug!(contact = %contact_id, count = messages.len(), "retrieved history");
        Ok(messages)
    }

    #[tracing::instrument(level = "debug", skip(self, profile))]
    async fn upsert_contact(&self, profile: &ContactProfile) -> Result<()> {
        let response = self
            .authed(self.http.post(self.table_url("contacts")))
            .timeout(WRITE_TIMEOUT)
            .header("Prefer", "resolution=merge-duplicates")
            .json(profile)
            .send()
            .await?;

        let status = response.status();
        // 409 means the row already exists; merge-duplicates handled it.
        if !status.is_success() && status.as_u16() != 409 {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Http(format!(
                "upsert contact status={status} body={body}"
            )));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_contact(&self, contact_id: &str) -> Result<Option<ContactProfile>> {
        let response = self
            .authed(self.http.get(self.table_url("contacts")))
            .timeout(READ_TIMEOUT)
            .query(&[
                ("contact_id", format!("eq.{contact_id}")),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Http(format!(
                "get contact status={status} body={body}"
            )));
        }

        let mut rows: Vec<ContactProfile> = serde_json::from_str(&body)?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_strips_trailing_slash() {
        let store = RestStore::new("https://db.example.com/", "key");
        assert_eq!(
            store.table_url("messages"),
            "https://db.example.com/rest/v1/messages"
        );
    }

    #[test]
    fn stored_message_uses_wire_column_names() {
        let row = StoredMessage {
            contact_id: "c1".to_string(),
            body: "hello".to_string(),
            kind: MessageKind::AiResponse,
            created_at: Utc::now(),
            metadata: None,
        };
        let json = serde_json::to_value(&row).expect("serialize");
        assert_eq!(json["message_body"], "hello");
        assert_eq!(json["message_type"], "AI_RESPONSE");
        assert!(json.get("metadata").is_none());
    }
}
