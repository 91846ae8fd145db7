//! Inbound webhook ingestion.
//!
//! The platform retries slow webhooks, so the handler acknowledges
//! immediately and does storage plus scheduling in a background task.

use crate::server::AppState;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use burst_core::SchedulerError;
use burst_store::{ContactProfile, MessageKind};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WebhookMessage {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WebhookPayload {
    #[serde(default)]
    pub contact_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    /// Lead-source tag; the upstream CRM sends it as "sourceforai".
    #[serde(default, alias = "sourceforai")]
    pub source_tag: Option<String>,
    #[serde(default)]
    pub message: Option<WebhookMessage>,
}

impl WebhookPayload {
    fn profile(&self) -> ContactProfile {
        ContactProfile {
            contact_id: self.contact_id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
            source_tag: self
                .source_tag
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }

    fn message_body(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.body.trim())
            .filter(|b| !b.is_empty())
    }
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/webhook", post(receive_webhook))
}

#[tracing::instrument(level = "info", skip_all, fields(contact = %payload.contact_id))]
async fn receive_webhook(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, Json<serde_json::Value>) {
    if payload.contact_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "error", "error": "contact_id is required" })),
        );
    }

    let batch_wait = state.scheduler.delay().as_secs();
    let contact_id = payload.contact_id.clone();

    // Ack first; persistence and scheduling happen off the request path.
    tokio::spawn(ingest(state, payload));

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "received",
            "contact_id": contact_id,
            "batch_wait_seconds": batch_wait,
        })),
    )
}

async fn ingest(state: Arc<AppState>, payload: WebhookPayload) {
    let profile = payload.profile();
    let contact_id = profile.contact_id.clone();

    if let Err(e) = state.store.upsert_contact(&profile).await {
        tracing::warn!(contact = %contact_id, error = %e, "contact upsert failed");
    }

    let Some(body) = payload.message_body() else {
        // Contact-created event with no inbound text: open with the
        // source-specific first message instead of batching.
        tracing::info!(contact = %contact_id, "no message body, sending first outreach");
        if let Err(e) = state.pipeline.send_first_contact(&profile).await {
            tracing::error!(contact = %contact_id, error = %e, "first outreach failed");
        }
        return;
    };

    if let Err(e) = state
        .store
        .append_message(&contact_id, body, MessageKind::Sms, None)
        .await
    {
        tracing::warn!(contact = %contact_id, error = %e, "inbound message persist failed");
    }

    match state.scheduler.on_message(&contact_id, body) {
        Ok(()) => {}
        Err(SchedulerError::AtCapacity { limit }) => {
            tracing::warn!(contact = %contact_id, limit, "batch capacity reached, message persisted but not batched");
        }
        Err(e) => {
            tracing::error!(contact = %contact_id, error = %e, "scheduling inbound message failed");
        }
    }
}
