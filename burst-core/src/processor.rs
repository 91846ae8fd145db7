use crate::batch::BatchSnapshot;
use anyhow::Result;
use async_trait::async_trait;

/// Downstream consumer of completed batches.
///
/// Invoked exactly once per detached batch, off the scheduler's critical
/// section. By the time `process` runs the batch no longer exists in the
/// scheduler, so an error here loses at most this one reply and can never
/// wedge the contact key or block future batches.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, batch: BatchSnapshot) -> Result<()>;
}
