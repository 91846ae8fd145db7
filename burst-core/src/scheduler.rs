//! Sliding-window batch scheduler, one timer/batch pair per contact key.
//!
//! Every inbound message pushes the key's deadline forward; a batch flushes
//! only after a full quiet period. Detachment is a single atomic map removal
//! under the same shard lock that guards appends, so "append vs. fire" can
//! never lose a message or flush an empty batch, and double-detach is
//! structurally impossible.

use crate::batch::{ActiveBatch, BatchRecord, BatchSnapshot, BatchStatus};
use crate::deadline::DeadlineQueue;
use crate::error::{Result, SchedulerError};
use crate::processor::BatchProcessor;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const MIN_DELAY: Duration = Duration::from_secs(5);
pub const MAX_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period before a batch is considered complete.
    pub delay: Duration,
    /// Cap on simultaneously accumulating contact keys.
    pub max_concurrent_batches: usize,
    /// Batches older than this are dropped by the sweeper regardless of
    /// timer state.
    pub max_batch_age: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            max_concurrent_batches: 50,
            max_batch_age: Duration::from_secs(3600),
        }
    }
}

struct SchedulerInner {
    batches: DashMap<String, BatchRecord>,
    deadlines: DeadlineQueue,
    delay_ms: AtomicU64,
    max_concurrent_batches: usize,
    max_batch_age: Duration,
    processor: Arc<dyn BatchProcessor>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler").finish_non_exhaustive()
    }
}

impl BatchScheduler {
    pub fn new(config: SchedulerConfig, processor: Arc<dyn BatchProcessor>) -> Result<Self> {
        validate_delay(config.delay)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                batches: DashMap::new(),
                deadlines: DeadlineQueue::new(),
                delay_ms: AtomicU64::new(config.delay.as_millis() as u64),
                max_concurrent_batches: config.max_concurrent_batches,
                max_batch_age: config.max_batch_age,
                processor,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Spawn the timing loop. Must be called once before deadlines can fire.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run().await;
            tracing::info!("batch scheduler timing loop exited");
        })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Record an inbound message and push the key's flush deadline forward.
    ///
    /// Never blocks on I/O; only mutates in-memory state and re-arms the
    /// deadline.
    #[tracing::instrument(level = "debug", skip(self, body))]
    pub fn on_message(&self, key: &str, body: impl Into<String>) -> Result<()> {
        let body = body.into();

        // Advisory capacity check, taken outside the entry lock: counting
        // shards while holding one would self-deadlock.
        if self.inner.batches.len() >= self.inner.max_concurrent_batches
            && !self.inner.batches.contains_key(key)
        {
            tracing::warn!(
                contact = %key,
                limit = self.inner.max_concurrent_batches,
                "rejecting new batch at capacity"
            );
            return Err(SchedulerError::AtCapacity {
                limit: self.inner.max_concurrent_batches,
            });
        }

        match self.inner.batches.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.append(body);
                tracing::info!(
                    contact = %key,
                    batch_id = %record.batch_id,
                    message_count = record.messages.len(),
                    "extended batch, deadline reset"
                );
            }
            Entry::Vacant(entry) => {
                let record = BatchRecord::new(key, body);
                tracing::info!(
                    contact = %key,
                    batch_id = %record.batch_id,
                    delay_ms = self.inner.delay_ms.load(Ordering::Relaxed),
                    "started new batch"
                );
                entry.insert(record);
            }
        }

        self.inner.deadlines.arm(key, self.delay());
        Ok(())
    }

    /// Detach and process the key's batch immediately, returning the
    /// snapshot for out-of-band callers.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn force_flush(&self, key: &str) -> Result<BatchSnapshot> {
        self.inner.deadlines.cancel(key);
        let snapshot = self
            .inner
            .detach(key)
            .ok_or_else(|| SchedulerError::NotFound(key.to_string()))?;
        tracing::info!(
            contact = %key,
            batch_id = %snapshot.batch_id,
            message_count = snapshot.message_count(),
            "force flushing batch"
        );
        self.inner.spawn_process(snapshot.clone());
        Ok(snapshot)
    }

    /// Discard the key's pending batch without invoking the processor.
    /// Returns whether anything was canceled; after a flush has detached the
    /// batch this is a no-op returning `false`.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn cancel(&self, key: &str) -> bool {
        self.inner.deadlines.cancel(key);
        let removed = self.inner.batches.remove(key);
        if let Some((_, record)) = &removed {
            tracing::info!(
                contact = %key,
                batch_id = %record.batch_id,
                message_count = record.messages.len(),
                "canceled pending batch"
            );
        }
        removed.is_some()
    }

    /// Discard every pending batch without invoking the processor. Returns
    /// the number of batches dropped. Operator escape hatch for wedged or
    /// runaway batching; in-flight processor calls run to completion.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self
            .inner
            .batches
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut dropped = 0;
        for key in keys {
            self.inner.deadlines.cancel(&key);
            if self.inner.batches.remove(&key).is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, "canceled all pending batches");
        }
        dropped
    }

    /// Read-only snapshot for observability. Does not touch timer state.
    pub fn status(&self, key: &str) -> Result<BatchStatus> {
        let record = self
            .inner
            .batches
            .get(key)
            .ok_or_else(|| SchedulerError::NotFound(key.to_string()))?;
        Ok(BatchStatus {
            key: record.key.clone(),
            batch_id: record.batch_id.clone(),
            message_count: record.messages.len(),
            created_at: record.created_at,
            last_activity_at: record.last_activity_at,
            elapsed: record.started.elapsed(),
            remaining: self.inner.deadlines.remaining(key).unwrap_or_default(),
        })
    }

    pub fn list_active(&self) -> Vec<ActiveBatch> {
        let mut active: Vec<ActiveBatch> = self
            .inner
            .batches
            .iter()
            .map(|entry| ActiveBatch {
                key: entry.key().clone(),
                message_count: entry.value().messages.len(),
                remaining: self
                    .inner
                    .deadlines
                    .remaining(entry.key())
                    .unwrap_or_default(),
            })
            .collect();
        active.sort_by(|a, b| a.key.cmp(&b.key));
        active
    }

    pub fn active_count(&self) -> usize {
        self.inner.batches.len()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.inner.delay_ms.load(Ordering::Relaxed))
    }

    /// Runtime reconfiguration of the quiet period. Applies to deadlines
    /// armed after the call; already-armed deadlines keep their instant.
    pub fn set_delay(&self, delay: Duration) -> Result<()> {
        validate_delay(delay)?;
        self.inner
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
        tracing::info!(delay_ms = delay.as_millis() as u64, "debounce delay updated");
        Ok(())
    }
}

impl SchedulerInner {
    async fn run(&self) {
        loop {
            let next = self.deadlines.next_deadline();
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.deadlines.changed() => {}
                _ = sleep_until_or_forever(next) => {
                    self.flush_expired();
                    self.sweep_stale();
                }
            }
        }
    }

    fn flush_expired(&self) {
        for key in self.deadlines.take_expired(Instant::now()) {
            match self.detach(&key) {
                Some(snapshot) => {
                    tracing::info!(
                        contact = %key,
                        batch_id = %snapshot.batch_id,
                        message_count = snapshot.message_count(),
                        "quiet period elapsed, flushing batch"
                    );
                    self.spawn_process(snapshot);
                }
                // Force-flushed or canceled after the deadline was collected.
                None => tracing::debug!(contact = %key, "expired deadline for absent batch"),
            }
        }
    }

    /// Drop records that outlived the max batch age. With a healthy timing
    /// loop this never triggers; it exists so a wedged key cannot pin memory
    /// forever.
    fn sweep_stale(&self) {
        let stale: Vec<String> = self
            .batches
            .iter()
            .filter(|entry| entry.value().started.elapsed() > self.max_batch_age)
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            self.deadlines.cancel(&key);
            if self.batches.remove(&key).is_some() {
                tracing::warn!(contact = %key, "dropped stale batch past max age");
            }
        }
    }

    /// The single mutation point that moves a batch out of live state. The
    /// removal holds the same shard lock as appends, so a message racing the
    /// fire either lands in the snapshot or starts a fresh record.
    fn detach(&self, key: &str) -> Option<BatchSnapshot> {
        self.batches
            .remove(key)
            .map(|(_, record)| record.into_snapshot())
    }

    fn spawn_process(&self, snapshot: BatchSnapshot) {
        let processor = self.processor.clone();
        tokio::spawn(async move {
            let contact = snapshot.key.clone();
            let batch_id = snapshot.batch_id.clone();
            if let Err(e) = processor.process(snapshot).await {
                tracing::error!(
                    contact = %contact,
                    batch_id = %batch_id,
                    error = %e,
                    "batch processor failed; batch is lost"
                );
            }
        });
    }
}

fn validate_delay(delay: Duration) -> Result<()> {
    if delay < MIN_DELAY || delay > MAX_DELAY {
        return Err(SchedulerError::InvalidDelay {
            requested: delay,
            min: MIN_DELAY,
            max: MAX_DELAY,
        });
    }
    Ok(())
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingProcessor {
        calls: Mutex<Vec<BatchSnapshot>>,
    }

    #[async_trait::async_trait]
    impl BatchProcessor for RecordingProcessor {
        async fn process(&self, batch: BatchSnapshot) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(batch);
            Ok(())
        }
    }

    impl RecordingProcessor {
        fn calls(&self) -> Vec<BatchSnapshot> {
            self.calls.lock().unwrap().clone()
        }
    }

    /// Holds every `process` call until released, to simulate an in-flight
    /// downstream AI call.
    struct BlockingProcessor {
        release: Notify,
        calls: Mutex<Vec<BatchSnapshot>>,
    }

    #[async_trait::async_trait]
    impl BatchProcessor for BlockingProcessor {
        async fn process(&self, batch: BatchSnapshot) -> anyhow::Result<()> {
            self.release.notified().await;
            self.calls.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn scheduler_with(
        delay_secs: u64,
        processor: Arc<dyn BatchProcessor>,
    ) -> (BatchScheduler, tokio::task::JoinHandle<()>) {
        let scheduler = BatchScheduler::new(
            SchedulerConfig {
                delay: Duration::from_secs(delay_secs),
                ..SchedulerConfig::default()
            },
            processor,
        )
        .expect("valid config");
        let handle = scheduler.start();
        (scheduler, handle)
    }

    /// Let the timing loop and spawned processor tasks run to quiescence.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(secs: u64) {
        tokio::time::advance(Duration::from_secs(secs)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_single_flush() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "hi").unwrap();
        advance(10).await;
        scheduler.on_message("c1", "question").unwrap();
        advance(5).await;
        scheduler.on_message("c1", "about gym").unwrap();

        // Deadline slid to t=45; nothing fires at t=44.
        advance(29).await;
        assert!(processor.calls().is_empty());
        assert_eq!(scheduler.active_count(), 1);

        advance(1).await;
        let calls = processor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages, vec!["hi", "question", "about gym"]);
        assert_eq!(calls[0].key, "c1");
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_gap_produces_two_batches() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "first").unwrap();
        advance(30).await;
        assert_eq!(processor.calls().len(), 1);

        scheduler.on_message("c1", "second").unwrap();
        advance(30).await;

        let calls = processor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].messages, vec!["first"]);
        assert_eq!(calls[1].messages, vec!["second"]);
        assert_ne!(calls[0].batch_id, calls[1].batch_id);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_flush_independently() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "a").unwrap();
        advance(1).await;
        scheduler.on_message("c2", "b").unwrap();

        advance(29).await;
        let calls = processor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].key, "c1");
        assert_eq!(calls[0].messages, vec!["a"]);

        advance(1).await;
        let calls = processor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].key, "c2");
        assert_eq!(calls[1].messages, vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_expiry_suppresses_processing() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "never sent").unwrap();
        advance(10).await;
        assert!(scheduler.cancel("c1"));

        advance(60).await;
        assert!(processor.calls().is_empty());
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_discards_every_pending_batch() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "a").unwrap();
        scheduler.on_message("c2", "b").unwrap();
        scheduler.on_message("c3", "c").unwrap();
        assert_eq!(scheduler.active_count(), 3);

        assert_eq!(scheduler.cancel_all(), 3);
        assert_eq!(scheduler.active_count(), 0);

        advance(60).await;
        assert!(processor.calls().is_empty());
        assert_eq!(scheduler.cancel_all(), 0);

        // Keys accept fresh batches after the sweep.
        scheduler.on_message("c1", "again").unwrap();
        advance(30).await;
        assert_eq!(processor.calls().len(), 1);
        assert_eq!(processor.calls()[0].messages, vec!["again"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_flush_is_noop() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "msg").unwrap();
        advance(30).await;
        assert_eq!(processor.calls().len(), 1);
        assert!(!scheduler.cancel("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn force_flush_returns_accumulated_messages() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "one").unwrap();
        scheduler.on_message("c1", "two").unwrap();

        let snapshot = scheduler.force_flush("c1").unwrap();
        assert_eq!(snapshot.messages, vec!["one", "two"]);
        assert_eq!(scheduler.active_count(), 0);
        settle().await;
        assert_eq!(processor.calls().len(), 1);

        // Key accepts a fresh batch immediately.
        scheduler.on_message("c1", "three").unwrap();
        let status = scheduler.status("c1").unwrap();
        assert_eq!(status.message_count, 1);

        // The old deadline was canceled; only the new batch flushes.
        advance(30).await;
        assert_eq!(processor.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn force_flush_absent_key_reports_not_found() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor);

        let err = scheduler.force_flush("ghost").unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn message_during_inflight_flush_starts_new_record() {
        let processor = Arc::new(BlockingProcessor {
            release: Notify::new(),
            calls: Mutex::new(Vec::new()),
        });
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "batch one").unwrap();
        advance(30).await;
        // Processor is now parked inside `process` for the first batch.
        assert_eq!(scheduler.active_count(), 0);

        scheduler.on_message("c1", "batch two").unwrap();
        let status = scheduler.status("c1").unwrap();
        assert_eq!(status.message_count, 1);

        processor.release.notify_one();
        settle().await;
        advance(30).await;
        processor.release.notify_one();
        settle().await;

        let calls = processor.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].messages, vec!["batch one"]);
        assert_eq!(calls[1].messages, vec!["batch two"]);
        assert_ne!(calls[0].batch_id, calls[1].batch_id);
    }

    #[tokio::test(start_paused = true)]
    async fn status_is_read_only() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.on_message("c1", "msg").unwrap();
        advance(10).await;

        let first = scheduler.status("c1").unwrap();
        let second = scheduler.status("c1").unwrap();
        assert_eq!(first.message_count, second.message_count);
        assert_eq!(first.remaining, second.remaining);
        assert_eq!(first.remaining, Duration::from_secs(20));

        // Repeated polling never pushed the deadline; flush still at t=30.
        advance(20).await;
        assert_eq!(processor.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_new_keys_at_capacity() {
        let processor = Arc::new(RecordingProcessor::default());
        let scheduler = BatchScheduler::new(
            SchedulerConfig {
                delay: Duration::from_secs(30),
                max_concurrent_batches: 1,
                ..SchedulerConfig::default()
            },
            processor,
        )
        .expect("valid config");
        let _loop = scheduler.start();

        scheduler.on_message("c1", "a").unwrap();
        let err = scheduler.on_message("c2", "b").unwrap_err();
        assert!(matches!(err, SchedulerError::AtCapacity { limit: 1 }));

        // Existing batches still accept appends at capacity.
        scheduler.on_message("c1", "c").unwrap();
        assert_eq!(scheduler.status("c1").unwrap().message_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_bounds_are_enforced() {
        let processor = Arc::new(RecordingProcessor::default());
        let err = BatchScheduler::new(
            SchedulerConfig {
                delay: Duration::from_secs(1),
                ..SchedulerConfig::default()
            },
            processor.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidDelay { .. }));

        let (scheduler, _loop) = scheduler_with(30, processor);
        assert!(scheduler.set_delay(Duration::from_secs(301)).is_err());
        assert!(scheduler.set_delay(Duration::from_secs(5)).is_ok());
        assert_eq!(scheduler.delay(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn set_delay_applies_to_subsequent_messages() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor.clone());

        scheduler.set_delay(Duration::from_secs(10)).unwrap();
        scheduler.on_message("c1", "quick").unwrap();
        advance(10).await;

        let calls = processor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages, vec!["quick"]);
    }

    #[tokio::test(start_paused = true)]
    async fn list_active_reports_remaining_time() {
        let processor = Arc::new(RecordingProcessor::default());
        let (scheduler, _loop) = scheduler_with(30, processor);

        scheduler.on_message("c1", "a").unwrap();
        advance(5).await;
        scheduler.on_message("c2", "b").unwrap();

        let active = scheduler.list_active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].key, "c1");
        assert_eq!(active[0].remaining, Duration::from_secs(25));
        assert_eq!(active[1].key, "c2");
        assert_eq!(active[1].remaining, Duration::from_secs(30));
    }
}
