use crate::error::Result;
use crate::types::{ContactProfile, MessageKind, StoredMessage};
use async_trait::async_trait;

/// Durable message/contact storage. Writes are assumed at-least-once
/// idempotent; a duplicate append is tolerable but not expected.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(
        &self,
        contact_id: &str,
        body: &str,
        kind: MessageKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Chronologically ordered history, oldest first, capped at `limit`.
    async fn get_history(&self, contact_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    async fn upsert_contact(&self, profile: &ContactProfile) -> Result<()>;

    async fn get_contact(&self, contact_id: &str) -> Result<Option<ContactProfile>>;
}
