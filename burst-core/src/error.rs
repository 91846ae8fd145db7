use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no active batch for contact: {0}")]
    NotFound(String),

    #[error("debounce delay {requested:?} outside allowed range {min:?}..={max:?}")]
    InvalidDelay {
        requested: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("maximum concurrent batches reached ({limit})")]
    AtCapacity { limit: usize },
}
