//! Chat-completions client for generating SMS replies.

pub mod client;
pub mod error;
pub mod types;

pub use client::LlmClient;
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ReplyOutcome, Role};
