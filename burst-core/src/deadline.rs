//! Per-key countdown deadlines driven by one timing loop.
//!
//! Re-arming a key is a map overwrite, not a cancel-and-respawn of an OS
//! timer, so there is no window where a reset can race a stale fire. The
//! owning loop sleeps until the earliest deadline and is woken through a
//! `Notify` permit whenever a deadline is armed or canceled.

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct DeadlineQueue {
    deadlines: DashMap<String, Instant>,
    changed: Notify,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or reset the countdown for `key` to `now + delay`.
    pub fn arm(&self, key: &str, delay: Duration) {
        self.deadlines.insert(key.to_string(), Instant::now() + delay);
        self.changed.notify_one();
    }

    /// Stop the countdown for `key`. No-op when absent or already expired.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.deadlines.remove(key).is_some();
        if removed {
            self.changed.notify_one();
        }
        removed
    }

    pub fn remaining(&self, key: &str) -> Option<Duration> {
        self.deadlines
            .get(key)
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().map(|e| *e.value()).min()
    }

    /// Remove and return every key whose deadline has passed. A key re-armed
    /// concurrently (new message mid-collection) keeps its fresh deadline and
    /// is not reported as expired.
    pub fn take_expired(&self, now: Instant) -> Vec<String> {
        let candidates: Vec<String> = self
            .deadlines
            .iter()
            .filter(|e| *e.value() <= now)
            .map(|e| e.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|key| self.deadlines.remove_if(key, |_, d| *d <= now).is_some())
            .collect()
    }

    /// Resolves when a deadline has been armed or canceled since the previous
    /// call. A permit is stored if nobody is waiting, so arms are never lost.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
