//! In-process message log.
//!
//! Backs tests and benchmarks; same contract as the SQLite store without
//! touching disk.

use async_trait::async_trait;
use parley_core::{ChatEvent, MessageStore, PersistedMessage, StoreError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Volatile [`MessageStore`] holding records in a vector.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<PersistedMessage>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PersistedMessage>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, event: &ChatEvent) -> Result<PersistedMessage, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = PersistedMessage::from_event(id, event);
        self.lock().push(record.clone());
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PersistedMessage>, StoreError> {
        let mut records = self.lock().clone();
        records.sort_by_key(|r| (r.timestamp, r.id));
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::EventKind;

    #[tokio::test]
    async fn test_append_and_recent() {
        let store = MemoryStore::new();

        for i in 0..5 {
            let mut event = ChatEvent::broadcast("alice", format!("message {i}"));
            event.timestamp = 100 + i;
            store.append(&event).await.unwrap();
        }

        let recent = store.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content.as_deref(), Some("message 2"));
        assert_eq!(recent[2].content.as_deref(), Some("message 4"));
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_increasing() {
        let store = MemoryStore::new();

        let a = store.append(&ChatEvent::join("alice")).await.unwrap();
        let b = store.append(&ChatEvent::join("bob")).await.unwrap();

        assert_eq!(a.kind, EventKind::Join);
        assert!(b.id > a.id);
    }
}
