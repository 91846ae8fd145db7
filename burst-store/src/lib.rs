//! Contact and message persistence collaborators.
//!
//! The scheduler core never talks to storage directly; everything goes
//! through [`MessageStore`]. `RestStore` speaks to a PostgREST-style API,
//! `MemoryStore` backs dev mode and tests.

pub mod error;
pub mod memory;
pub mod rest;
pub mod traits;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use rest::RestStore;
pub use traits::MessageStore;
pub use types::{ContactProfile, MessageKind, StoredMessage};
