//! Turns one raw record into a persisted [`Event`] or a [`ProcessingError`].

use crate::event::{Event, OriginalMessage, RetryEnvelope};
use crate::store::EventStore;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// What went wrong while processing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Main-topic record was not UTF-8 JSON
    Decode,
    /// Retry-topic record was not a valid envelope
    Envelope,
    /// JSON was decoded but is not a well-formed event
    Validation,
    /// The store rejected the insert
    Persistence,
}

impl FailureKind {
    /// Label value for metrics export.
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::Envelope => "envelope",
            FailureKind::Validation => "validation",
            FailureKind::Persistence => "persistence",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A record that could not be persisted, with everything the router needs.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} failure at retry {retry_count}: {error}")]
pub struct ProcessingError {
    /// The record as received, or the envelope's original message
    pub original_message: OriginalMessage,
    /// Retry count of the record when it failed (0 on the main path)
    pub retry_count: u32,
    /// Human-readable failure description
    pub error: String,
    /// Failure category
    pub kind: FailureKind,
}

impl ProcessingError {
    fn new(
        kind: FailureKind,
        original_message: OriginalMessage,
        retry_count: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            original_message,
            retry_count,
            error: error.into(),
            kind,
        }
    }
}

/// Parses records and inserts the resulting events.
#[derive(Clone)]
pub struct RecordProcessor {
    store: Arc<dyn EventStore>,
}

impl RecordProcessor {
    /// Create a processor writing to `store`.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Process one record and return the store identifier of the persisted event.
    ///
    /// Main-topic records are the event JSON itself. Retry-topic records are
    /// [`RetryEnvelope`]s whose original message is processed instead.
    pub async fn process(&self, raw: &[u8], is_retry: bool) -> Result<String, ProcessingError> {
        let (original_message, retry_count) = if is_retry {
            Self::unwrap_envelope(raw)?
        } else {
            (Self::decode_record(raw)?, 0)
        };

        let event = original_message.to_event().map_err(|e| {
            ProcessingError::new(
                FailureKind::Validation,
                original_message.clone(),
                retry_count,
                e,
            )
        })?;

        let id = self.store.insert(&event).await.map_err(|e| {
            ProcessingError::new(
                FailureKind::Persistence,
                original_message.clone(),
                retry_count,
                e.to_string(),
            )
        })?;

        debug!(
            id = %id,
            event_id = %event.event_id,
            event_type = %event.event_type,
            retry_count = retry_count,
            "Event persisted"
        );

        Ok(id)
    }

    fn decode_record(raw: &[u8]) -> Result<OriginalMessage, ProcessingError> {
        let text = std::str::from_utf8(raw).map_err(|e| {
            ProcessingError::new(
                FailureKind::Decode,
                OriginalMessage::raw_from_bytes(raw),
                0,
                format!("Invalid UTF-8: {}", e),
            )
        })?;

        OriginalMessage::document(text).map_err(|e| {
            ProcessingError::new(
                FailureKind::Decode,
                OriginalMessage::Raw(text.to_string()),
                0,
                format!("Invalid JSON: {}", e),
            )
        })
    }

    fn unwrap_envelope(raw: &[u8]) -> Result<(OriginalMessage, u32), ProcessingError> {
        let envelope = RetryEnvelope::from_slice(raw).map_err(|e| {
            ProcessingError::new(
                FailureKind::Envelope,
                OriginalMessage::raw_from_bytes(raw),
                0,
                format!("Invalid retry envelope: {}", e),
            )
        })?;

        Ok((envelope.original_message, envelope.retry_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryEventStore;
    use async_trait::async_trait;

    struct RejectingStore;

    #[async_trait]
    impl EventStore for RejectingStore {
        async fn insert(&self, _event: &Event) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    const LOGIN_EVENT: &str = r#"{"eventType":"login","eventId":"e1","timestamp":"2024-01-01T00:00:00Z","payload":{"userId":"u1"}}"#;

    fn login_message() -> OriginalMessage {
        OriginalMessage::document(LOGIN_EVENT).unwrap()
    }

    #[tokio::test]
    async fn test_main_record_is_persisted() {
        let store = Arc::new(MemoryEventStore::new());
        let processor = RecordProcessor::new(store.clone());

        let id = processor.process(LOGIN_EVENT.as_bytes(), false).await.unwrap();

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].event.event_id, "e1");
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_raw_text() {
        let processor = RecordProcessor::new(Arc::new(MemoryEventStore::new()));

        let err = processor.process(b"not-json", false).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Decode);
        assert_eq!(err.retry_count, 0);
        assert_eq!(err.original_message, OriginalMessage::Raw("not-json".into()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decode_failure() {
        let processor = RecordProcessor::new(Arc::new(MemoryEventStore::new()));

        let err = processor.process(&[0xff, 0xfe], false).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Decode);
        assert!(err.error.starts_with("Invalid UTF-8"));
    }

    #[tokio::test]
    async fn test_incomplete_event_keeps_document() {
        let store = Arc::new(MemoryEventStore::new());
        let processor = RecordProcessor::new(store.clone());
        let partial = r#"{"eventType": "login", "eventId": "e1"}"#;

        let err = processor.process(partial.as_bytes(), false).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Validation);
        assert_eq!(err.original_message.to_json(), partial);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_persistence_failure() {
        let processor = RecordProcessor::new(Arc::new(RejectingStore));

        let err = processor.process(LOGIN_EVENT.as_bytes(), false).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Persistence);
        assert_eq!(err.retry_count, 0);
        assert_eq!(err.original_message, login_message());
        assert!(err.error.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_retry_record_unwraps_envelope() {
        let store = Arc::new(MemoryEventStore::new());
        let processor = RecordProcessor::new(store.clone());
        let envelope =
            RetryEnvelope::new(login_message(), 2, "store unavailable");

        processor
            .process(&envelope.to_vec().unwrap(), true)
            .await
            .unwrap();
        assert_eq!(store.events()[0].event.event_type, "login");
    }

    #[tokio::test]
    async fn test_retry_failure_carries_envelope_count() {
        let processor = RecordProcessor::new(Arc::new(RejectingStore));
        let envelope = RetryEnvelope::new(login_message(), 2, "x");

        let err = processor
            .process(&envelope.to_vec().unwrap(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Persistence);
        assert_eq!(err.retry_count, 2);
        assert_eq!(err.original_message, login_message());
    }

    #[tokio::test]
    async fn test_malformed_envelope_restarts_count() {
        let processor = RecordProcessor::new(Arc::new(MemoryEventStore::new()));

        let err = processor
            .process(br#"{"retryCount": 2}"#, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Envelope);
        assert_eq!(err.retry_count, 0);
        assert_eq!(
            err.original_message,
            OriginalMessage::Raw(r#"{"retryCount": 2}"#.into())
        );
    }

    #[tokio::test]
    async fn test_raw_original_fails_validation_on_retry() {
        let processor = RecordProcessor::new(Arc::new(MemoryEventStore::new()));
        let envelope = RetryEnvelope::new(OriginalMessage::Raw("not-json".into()), 1, "x");

        let err = processor
            .process(&envelope.to_vec().unwrap(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Validation);
        assert_eq!(err.retry_count, 1);
        assert_eq!(err.original_message, OriginalMessage::Raw("not-json".into()));
    }
}
