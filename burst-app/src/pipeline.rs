//! Reply pipeline: the downstream consumer of completed batches.
//!
//! Runs strictly after the scheduler has detached a batch, so any failure
//! here loses at most one reply and never touches scheduler state.

use anyhow::Result;
use async_trait::async_trait;
use burst_core::{BatchProcessor, BatchSnapshot};
use burst_llm::{ChatMessage, LlmClient};
use burst_store::{ContactProfile, MessageKind, MessageStore, StoredMessage};
use std::sync::Arc;

use crate::delivery::ReplySender;
use crate::prompts::PromptBook;

const HISTORY_LIMIT: usize = 20;

pub struct ReplyPipeline {
    store: Arc<dyn MessageStore>,
    llm: Option<LlmClient>,
    sender: Arc<dyn ReplySender>,
    prompts: Arc<PromptBook>,
}

impl ReplyPipeline {
    pub fn new(
        store: Arc<dyn MessageStore>,
        llm: Option<LlmClient>,
        sender: Arc<dyn ReplySender>,
        prompts: Arc<PromptBook>,
    ) -> Self {
        Self {
            store,
            llm,
            sender,
            prompts,
        }
    }

    /// First outreach for a contact created without an inbound message
    /// (e.g. a raffle form entry). Bypasses the responder entirely.
    #[tracing::instrument(level = "info", skip(self, profile), fields(contact = %profile.contact_id))]
    pub async fn send_first_contact(&self, profile: &ContactProfile) -> Result<()> {
        let text = self
            .prompts
            .resolve_first_message(profile.source_tag.as_deref(), profile.display_name());
        self.sender.send(&profile.contact_id, &text).await?;
        self.store
            .append_message(
                &profile.contact_id,
                &text,
                MessageKind::AiResponse,
                Some(serde_json::json!({ "response_type": "first_message" })),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BatchProcessor for ReplyPipeline {
    #[tracing::instrument(level = "info", skip(self, batch), fields(contact = %batch.key, batch_id = %batch.batch_id))]
    async fn process(&self, batch: BatchSnapshot) -> Result<()> {
        let combined = batch.messages.join(" ");
        tracing::info!(
            message_count = batch.message_count(),
            "processing completed batch"
        );

        let Some(llm) = &self.llm else {
            tracing::warn!("llm not configured, skipping reply generation");
            return Ok(());
        };

        // History and contact lookups are best-effort: a reply with thin
        // context beats no reply.
        let contact = match self.store.get_contact(&batch.key).await {
            Ok(contact) => contact,
            Err(e) => {
                tracing::warn!(error = %e, "contact lookup failed, using default prompt");
                None
            }
        };
        let history = match self.store.get_history(&batch.key, HISTORY_LIMIT).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "history fetch failed, replying without context");
                Vec::new()
            }
        };

        let source_tag = contact.as_ref().and_then(|c| c.source_tag.as_deref());
        let system_prompt = self.prompts.resolve_prompt(source_tag);
        let messages = build_chat_messages(system_prompt, &history, &combined);

        let outcome = llm.generate_reply(&messages).await?;
        tracing::info!(
            model = %outcome.model,
            tokens_used = outcome.tokens_used,
            "generated reply"
        );

        self.store
            .append_message(
                &batch.key,
                &outcome.text,
                MessageKind::AiResponse,
                Some(serde_json::json!({
                    "model": outcome.model,
                    "tokens_used": outcome.tokens_used,
                    "response_type": "ai_generated",
                    "batch_id": batch.batch_id,
                })),
            )
            .await?;

        self.sender.send(&batch.key, &outcome.text).await?;
        Ok(())
    }
}

/// Map stored history to chat roles and append the new combined message,
/// unless the history already ends with it (the webhook path persists
/// inbound messages before the batch flushes).
pub(crate) fn build_chat_messages(
    system_prompt: &str,
    history: &[StoredMessage],
    combined: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];

    for entry in history {
        if entry.body.is_empty() {
            continue;
        }
        messages.push(match entry.kind {
            MessageKind::Sms => ChatMessage::user(&entry.body),
            MessageKind::AiResponse => ChatMessage::assistant(&entry.body),
        });
    }

    let duplicate_tail = history.last().is_some_and(|m| m.body == combined);
    if !duplicate_tail {
        messages.push(ChatMessage::user(combined));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use burst_llm::Role;
    use burst_store::MemoryStore;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ReplySender for RecordingSender {
        async fn send(&self, contact_id: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((contact_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn stored(body: &str, kind: MessageKind) -> StoredMessage {
        StoredMessage {
            contact_id: "c1".to_string(),
            body: body.to_string(),
            kind,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    fn prompts() -> Arc<PromptBook> {
        Arc::new(PromptBook::from_config(
            &crate::config::PromptsConfig::default(),
        ))
    }

    #[test]
    fn chat_messages_preserve_roles_and_order() {
        let history = vec![
            stored("hi", MessageKind::Sms),
            stored("Hey! Want to enter?", MessageKind::AiResponse),
            stored("", MessageKind::Sms),
        ];
        let messages = build_chat_messages("be helpful", &history, "yes please");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "hi");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].role, Role::User);
        assert_eq!(messages[3].content, "yes please");
    }

    #[test]
    fn combined_message_not_duplicated_when_already_last_in_history() {
        let history = vec![stored("yes please", MessageKind::Sms)];
        let messages = build_chat_messages("be helpful", &history, "yes please");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "yes please");
    }

    #[tokio::test]
    async fn process_without_llm_skips_quietly() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::default());
        let pipeline = ReplyPipeline::new(store.clone(), None, sender.clone(), prompts());

        let batch = BatchSnapshot {
            key: "c1".to_string(),
            batch_id: "batch_c1_0".to_string(),
            messages: vec!["hi".to_string()],
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
        };
        pipeline.process(batch).await.expect("skip is not an error");

        assert!(sender.sent.lock().unwrap().is_empty());
        assert_eq!(store.message_count("c1"), 0);
    }

    #[tokio::test]
    async fn first_contact_sends_and_persists_templated_message() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::default());
        let pipeline = ReplyPipeline::new(store.clone(), None, sender.clone(), prompts());

        let profile = ContactProfile {
            contact_id: "c1".to_string(),
            first_name: "Sam".to_string(),
            source_tag: Some("form_entry".to_string()),
            ..ContactProfile::default()
        };
        pipeline
            .send_first_contact(&profile)
            .await
            .expect("first contact");

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "c1");
        assert!(sent[0].1.contains("Sam"));
        assert!(!sent[0].1.contains("[name]"));
        assert_eq!(store.message_count("c1"), 1);
    }
}
