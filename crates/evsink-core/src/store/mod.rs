//! Event persistence.
//!
//! The pipeline only ever inserts. Records are never updated or deleted, and
//! the store assigns its own identifier; `eventId` is not a uniqueness key.

mod jsonl;
mod memory;

pub use jsonl::JsonlEventStore;
pub use memory::MemoryEventStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::event::Event;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Insert-only event sink.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist one event and return the identifier the store assigned to it.
    async fn insert(&self, event: &Event) -> std::result::Result<String, StoreError>;
}

/// An event as written by the bundled backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Store-assigned identifier
    pub id: String,
    /// The persisted event
    #[serde(flatten)]
    pub event: Event,
    /// When the store accepted the write
    pub persisted_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Stamp an event with a fresh identifier.
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            persisted_at: Utc::now(),
        }
    }
}

/// Open the backend selected by configuration.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn EventStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryEventStore::new())),
        StoreBackend::Jsonl => {
            let path = config.path.as_ref().ok_or_else(|| {
                Error::Config("store.path is required for the jsonl backend".into())
            })?;
            Ok(Arc::new(JsonlEventStore::open(path)?))
        }
    }
}
