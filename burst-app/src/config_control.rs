use crate::config::BurstlineConfig;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub path: String,
    pub base_hash: String,
    pub updated_at: DateTime<Utc>,
    pub config: BurstlineConfig,
}

#[derive(Clone)]
pub struct ConfigControl {
    path: PathBuf,
    state: Arc<Mutex<ConfigState>>,
}

#[derive(Clone)]
struct ConfigState {
    config: BurstlineConfig,
    base_hash: String,
    updated_at: DateTime<Utc>,
}

impl ConfigControl {
    pub fn new(path: PathBuf, config: BurstlineConfig) -> Result<Self> {
        let base_hash = hash_config(&config)?;
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(ConfigState {
                config,
                base_hash,
                updated_at: Utc::now(),
            })),
        })
    }

    pub async fn snapshot(&self) -> ConfigSnapshot {
        let state = self.state.lock().await;
        ConfigSnapshot {
            path: self.path.display().to_string(),
            base_hash: state.base_hash.clone(),
            updated_at: state.updated_at,
            config: state.config.clone(),
        }
    }

    /// Apply a JSON merge patch with optimistic concurrency: a stale
    /// `base_hash` rejects the patch so two operators cannot silently
    /// overwrite each other.
    pub async fn patch(
        &self,
        base_hash: Option<&str>,
        patch: serde_json::Value,
    ) -> Result<ConfigSnapshot> {
        let mut state = self.state.lock().await;
        if let Some(hash) = base_hash {
            if hash != state.base_hash {
                return Err(anyhow::anyhow!("base_hash mismatch"));
            }
        }

        let mut current_json = serde_json::to_value(state.config.clone())?;
        merge_json_value(&mut current_json, patch);
        let next: BurstlineConfig = serde_json::from_value(current_json)?;
        next.validate()?;
        write_config_file(&self.path, &next).await?;

        state.base_hash = hash_config(&next)?;
        state.updated_at = Utc::now();
        state.config = next;

        Ok(ConfigSnapshot {
            path: self.path.display().to_string(),
            base_hash: state.base_hash.clone(),
            updated_at: state.updated_at,
            config: state.config.clone(),
        })
    }
}

fn hash_config(config: &BurstlineConfig) -> Result<String> {
    let bytes = serde_json::to_vec(config)?;
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

fn merge_json_value(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(&key);
                    continue;
                }
                let entry = target_map.entry(key).or_insert(serde_json::Value::Null);
                merge_json_value(entry, value);
            }
        }
        (target_value, patch_value) => {
            *target_value = patch_value;
        }
    }
}

async fn write_config_file(path: &Path, config: &BurstlineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = toml::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("burstline-{name}-{}.toml", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn patch_rejects_stale_base_hash() {
        let path = temp_path("cfg-stale");
        let control =
            ConfigControl::new(path.clone(), BurstlineConfig::default()).expect("new control");

        let snap = control.snapshot().await;
        let err = control
            .patch(
                Some("deadbeef"),
                serde_json::json!({ "batching": { "delay_seconds": 60 } }),
            )
            .await
            .expect_err("stale hash should fail");

        assert!(err.to_string().contains("base_hash mismatch"));
        let after = control.snapshot().await;
        assert_eq!(after.base_hash, snap.base_hash);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn patch_updates_delay_and_base_hash() {
        let path = temp_path("cfg-patch");
        let control =
            ConfigControl::new(path.clone(), BurstlineConfig::default()).expect("new control");

        let before = control.snapshot().await;
        let after = control
            .patch(
                Some(&before.base_hash),
                serde_json::json!({ "batching": { "delay_seconds": 60 } }),
            )
            .await
            .expect("patch should succeed");

        assert_ne!(before.base_hash, after.base_hash);
        assert_eq!(after.config.batching.delay_seconds, 60);

        let on_disk = tokio::fs::read_to_string(&path)
            .await
            .expect("read config file");
        assert!(on_disk.contains("delay_seconds = 60"));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn patch_rejects_out_of_bounds_delay() {
        let path = temp_path("cfg-bounds");
        let control =
            ConfigControl::new(path.clone(), BurstlineConfig::default()).expect("new control");

        let err = control
            .patch(None, serde_json::json!({ "batching": { "delay_seconds": 2 } }))
            .await
            .expect_err("out-of-bounds delay should fail");
        assert!(err.to_string().contains("delay_seconds"));

        let _ = std::fs::remove_file(path);
    }
}
