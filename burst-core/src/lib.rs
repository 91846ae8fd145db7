//! Per-contact debounce batching for inbound chat messages.
//!
//! Rapid-fire SMS exchanges should produce one AI reply per burst, not one per
//! message. `BatchScheduler` coalesces messages by contact key behind a
//! sliding-window quiet period and hands each completed batch to a
//! [`BatchProcessor`] exactly once.

pub mod batch;
pub mod deadline;
pub mod error;
pub mod processor;
pub mod scheduler;

pub use batch::{ActiveBatch, BatchSnapshot, BatchStatus};
pub use deadline::DeadlineQueue;
pub use error::{Result, SchedulerError};
pub use processor::BatchProcessor;
pub use scheduler::{BatchScheduler, SchedulerConfig};
