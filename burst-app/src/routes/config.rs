//! Runtime configuration inspection and patching.

use crate::server::AppState;
use axum::routing::{get, post};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchConfigRequest {
    #[serde(default)]
    base_hash: Option<String>,
    patch: serde_json::Value,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/config/patch", post(patch_config))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_config(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let snapshot = state.config_control.snapshot().await;
    let mut config = match serde_json::to_value(snapshot.config) {
        Ok(v) => v,
        Err(e) => {
            return Json(serde_json::json!({
                "status": "error",
                "error": format!("failed to serialize config snapshot: {e}")
            }));
        }
    };
    redact_keys(&mut config);
    Json(serde_json::json!({
        "status": "ok",
        "path": snapshot.path,
        "base_hash": snapshot.base_hash,
        "updated_at": snapshot.updated_at,
        "config": config,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn patch_config(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<PatchConfigRequest>,
) -> Json<serde_json::Value> {
    let snapshot = match state
        .config_control
        .patch(req.base_hash.as_deref(), req.patch)
        .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return Json(serde_json::json!({ "status": "error", "error": e.to_string() }));
        }
    };

    // The quiet period applies live; other sections need a restart.
    let delay = Duration::from_secs(snapshot.config.batching.delay_seconds);
    let delay_applied = match state.scheduler.set_delay(delay) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "patched delay not applied to running scheduler");
            false
        }
    };

    Json(serde_json::json!({
        "status": "ok",
        "path": snapshot.path,
        "base_hash": snapshot.base_hash,
        "updated_at": snapshot.updated_at,
        "delay_applied": delay_applied,
        "restart_required_for": ["server", "storage", "delivery", "llm", "prompts"],
    }))
}

fn redact_keys(config: &mut serde_json::Value) {
    for (section, key) in [
        ("llm", "api_key"),
        ("storage", "rest_api_key"),
        ("delivery", "api_key"),
    ] {
        if let Some(v) = config.get_mut(section).and_then(|s| s.get_mut(key)) {
            if v.as_str().is_some_and(|s| !s.is_empty()) {
                *v = serde_json::Value::String("REDACTED".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_only_populated_secrets() {
        let mut config = serde_json::json!({
            "llm": { "api_key": "sk-secret", "model": "gpt-4o-mini" },
            "storage": { "rest_api_key": "" },
            "delivery": { "api_key": "ghl-secret" },
        });
        redact_keys(&mut config);
        assert_eq!(config["llm"]["api_key"], "REDACTED");
        assert_eq!(config["llm"]["model"], "gpt-4o-mini");
        assert_eq!(config["storage"]["rest_api_key"], "");
        assert_eq!(config["delivery"]["api_key"], "REDACTED");
    }
}
