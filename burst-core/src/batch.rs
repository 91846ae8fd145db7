//! Accumulating batch records and their detached/read-only views.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Live accumulating state for one contact key. Owned by the scheduler's map;
/// all mutation happens under that map's per-shard lock.
#[derive(Debug)]
pub(crate) struct BatchRecord {
    pub key: String,
    pub batch_id: String,
    pub messages: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Monotonic start, for elapsed-time reporting under a paused test clock.
    pub started: Instant,
}

impl BatchRecord {
    pub fn new(key: &str, first_message: String) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            batch_id: format!("batch_{key}_{}", now.timestamp()),
            messages: vec![first_message],
            created_at: now,
            last_activity_at: now,
            started: Instant::now(),
        }
    }

    pub fn append(&mut self, message: String) {
        self.messages.push(message);
        self.last_activity_at = Utc::now();
    }

    pub fn into_snapshot(self) -> BatchSnapshot {
        BatchSnapshot {
            key: self.key,
            batch_id: self.batch_id,
            messages: self.messages,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Immutable batch detached from the scheduler. Once a snapshot exists the
/// key is free again; processor failure cannot reach back into live state.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub key: String,
    pub batch_id: String,
    pub messages: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl BatchSnapshot {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Read-only observability view of one live batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub key: String,
    pub batch_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub remaining: Duration,
}

/// One row of `list_active` output.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveBatch {
    pub key: String,
    pub message_count: usize,
    pub remaining: Duration,
}
