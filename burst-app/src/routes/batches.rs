//! Operational visibility and control over live batches.

use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Extension, Json};
use burst_core::SchedulerError;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/batches",
            get(list_batches).delete(cancel_all_batches),
        )
        .route("/api/v1/batches/{contact_id}", get(get_batch))
        .route("/api/v1/batches/{contact_id}", delete(cancel_batch))
        .route("/api/v1/batches/{contact_id}/flush", post(flush_batch))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_batches(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let active = state.scheduler.list_active();
    let batches: Vec<serde_json::Value> = active
        .iter()
        .map(|b| {
            serde_json::json!({
                "key": b.key,
                "message_count": b.message_count,
                "remaining_seconds": b.remaining.as_secs(),
            })
        })
        .collect();
    Json(serde_json::json!({
        "status": "ok",
        "count": batches.len(),
        "batches": batches,
    }))
}

/// Emergency sweep: drops every pending batch without generating replies.
#[tracing::instrument(level = "info", skip_all)]
async fn cancel_all_batches(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let cancelled = state.scheduler.cancel_all();
    Json(serde_json::json!({ "status": "ok", "cancelled": cancelled }))
}

#[tracing::instrument(level = "debug", skip_all, fields(contact = %contact_id))]
async fn get_batch(
    Extension(state): Extension<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.scheduler.status(&contact_id) {
        Ok(status) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "key": status.key,
                "batch_id": status.batch_id,
                "message_count": status.message_count,
                "created_at": status.created_at,
                "last_activity_at": status.last_activity_at,
                "elapsed_seconds": status.elapsed.as_secs(),
                "remaining_seconds": status.remaining.as_secs(),
            })),
        ),
        Err(SchedulerError::NotFound(_)) => not_found(&contact_id),
        Err(e) => internal_error(e),
    }
}

#[tracing::instrument(level = "info", skip_all, fields(contact = %contact_id))]
async fn flush_batch(
    Extension(state): Extension<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.scheduler.force_flush(&contact_id) {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "batch_id": snapshot.batch_id,
                "message_count": snapshot.message_count(),
            })),
        ),
        Err(SchedulerError::NotFound(_)) => not_found(&contact_id),
        Err(e) => internal_error(e),
    }
}

#[tracing::instrument(level = "info", skip_all, fields(contact = %contact_id))]
async fn cancel_batch(
    Extension(state): Extension<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    if state.scheduler.cancel(&contact_id) {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "cancelled": contact_id })),
        )
    } else {
        not_found(&contact_id)
    }
}

fn not_found(contact_id: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "status": "not_found",
            "error": format!("no active batch for contact {contact_id}"),
        })),
    )
}

fn internal_error(e: SchedulerError) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
    )
}
