//! Process-local store for development and tests.

use super::{EventStore, StoredEvent};
use crate::error::StoreError;
use crate::event::Event;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Keeps every inserted event in memory.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<StoredEvent>>,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything inserted so far, in insertion order.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.lock().clone()
    }

    /// Number of inserted events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: &Event) -> Result<String, StoreError> {
        let stored = StoredEvent::new(event.clone());
        let id = stored.id.clone();
        self.events.lock().push(stored);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_keeps_duplicates() {
        let store = MemoryEventStore::new();
        let event = serde_json::from_value::<Event>(json!({
            "eventId": "e1",
            "eventType": "login",
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": {}
        }))
        .unwrap();

        let first = store.insert(&event).await.unwrap();
        let second = store.insert(&event).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.len(), 2);
        assert_eq!(store.events()[1].event.event_id, "e1");
    }
}
