//! Message store capability trait.
//!
//! The relay treats durable storage as a collaborator: an append-only log
//! of accepted events, queried for bounded recent history. Implementations
//! live in `parley-store`.

use crate::event::{ChatEvent, PersistedMessage};
use async_trait::async_trait;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened or initialized.
    #[error("Failed to open message store: {0}")]
    Open(String),

    /// An append or query failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The blocking storage task was cancelled or panicked.
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Append-only log of chat events.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append an accepted event, returning the durable record with its
    /// store-assigned identity.
    async fn append(&self, event: &ChatEvent) -> Result<PersistedMessage, StoreError>;

    /// The most recent `limit` records, ascending by timestamp (ties
    /// broken by identity).
    async fn recent(&self, limit: usize) -> Result<Vec<PersistedMessage>, StoreError>;
}
