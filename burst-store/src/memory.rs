use crate::error::Result;
use crate::traits::MessageStore;
use crate::types::{ContactProfile, MessageKind, StoredMessage};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// In-memory store for dev mode and tests. Everything is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: DashMap<String, Vec<StoredMessage>>,
    contacts: DashMap<String, ContactProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self, contact_id: &str) -> usize {
        self.messages.get(contact_id).map_or(0, |m| m.len())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(
        &self,
        contact_id: &str,
        body: &str,
        kind: MessageKind,
        metadata: Option<serde_json::Value>,
    ) -> Result<()> {
        self.messages
            .entry(contact_id.to_string())
            .or_default()
            .push(StoredMessage {
                contact_id: contact_id.to_string(),
                body: body.to_string(),
                kind,
                created_at: Utc::now(),
                metadata,
            });
        Ok(())
    }

    async fn get_history(&self, contact_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let Some(messages) = self.messages.get(contact_id) else {
            return Ok(Vec::new());
        };
        // Same truncation as the REST backend: ascending order, first N rows.
        Ok(messages.iter().take(limit).cloned().collect())
    }

    async fn upsert_contact(&self, profile: &ContactProfile) -> Result<()> {
        self.contacts
            .insert(profile.contact_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_contact(&self, contact_id: &str) -> Result<Option<ContactProfile>> {
        Ok(self.contacts.get(contact_id).map(|c| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_preserves_insertion_order() {
        let store = MemoryStore::new();
        for body in ["one", "two", "three"] {
            store
                .append_message("c1", body, MessageKind::Sms, None)
                .await
                .expect("append");
        }

        let history = store.get_history("c1", 20).await.expect("history");
        let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn history_limit_keeps_oldest_like_rest_backend() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_message("c1", &format!("m{i}"), MessageKind::Sms, None)
                .await
                .expect("append");
        }

        let history = store.get_history("c1", 2).await.expect("history");
        let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn history_for_unknown_contact_is_empty() {
        let store = MemoryStore::new();
        assert!(store.get_history("ghost", 20).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_contact() {
        let store = MemoryStore::new();
        let mut profile = ContactProfile {
            contact_id: "c1".to_string(),
            first_name: "Sam".to_string(),
            ..ContactProfile::default()
        };
        store.upsert_contact(&profile).await.expect("upsert");

        profile.source_tag = Some("facebook".to_string());
        store.upsert_contact(&profile).await.expect("upsert");

        let loaded = store
            .get_contact("c1")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(loaded.source_tag.as_deref(), Some("facebook"));
    }
}
