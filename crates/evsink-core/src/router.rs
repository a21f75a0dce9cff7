//! Bounded retry / dead-letter routing of failed records.
//!
//! A failed record is wrapped in a [`RetryEnvelope`] and published to the
//! retry topic while its count is below [`MAX_RETRIES`], otherwise to the
//! dead-letter topic. Publish failures never propagate: they are logged and,
//! when a spool is configured, written locally.

use crate::broker::RecordPublisher;
use crate::event::RetryEnvelope;
use crate::metrics::PipelineMetrics;
use crate::processor::ProcessingError;
use crate::spool::DeadLetterSpool;
use crate::topics::{DEAD_LETTER_TOPIC, RETRY_TOPIC};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Number of passes through the retry topic before a record is dead-lettered.
pub const MAX_RETRIES: u32 = 3;

/// Where a failed record goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Publish to the retry topic with the incremented count
    Retry {
        /// Count carried by the new envelope
        retry_count: u32,
    },
    /// Publish to the dead-letter topic with the count unchanged
    DeadLetter {
        /// Count carried by the terminal envelope
        retry_count: u32,
    },
}

impl RoutingDecision {
    /// Decide based on the count the record failed with.
    pub fn for_count(current: u32, max_retries: u32) -> Self {
        if current < max_retries {
            RoutingDecision::Retry {
                retry_count: current + 1,
            }
        } else {
            RoutingDecision::DeadLetter {
                retry_count: current,
            }
        }
    }

    /// Destination topic.
    pub fn topic(&self) -> &'static str {
        match self {
            RoutingDecision::Retry { .. } => RETRY_TOPIC,
            RoutingDecision::DeadLetter { .. } => DEAD_LETTER_TOPIC,
        }
    }

    /// Count written into the envelope.
    pub fn retry_count(&self) -> u32 {
        match self {
            RoutingDecision::Retry { retry_count }
            | RoutingDecision::DeadLetter { retry_count } => *retry_count,
        }
    }
}

/// What happened to a failed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Published to the retry topic
    Retried {
        /// Count carried by the published envelope
        retry_count: u32,
    },
    /// Published to the dead-letter topic
    DeadLettered {
        /// Count carried by the published envelope
        retry_count: u32,
    },
    /// Publish failed; the envelope was written to the local spool
    Spooled {
        /// Topic the envelope was meant for
        topic: String,
    },
    /// Publish failed and there was nowhere else to put the envelope
    Dropped {
        /// Topic the envelope was meant for
        topic: String,
        /// Publish error
        error: String,
    },
}

impl RouteOutcome {
    /// True if the envelope reached the broker.
    pub fn is_published(&self) -> bool {
        matches!(
            self,
            RouteOutcome::Retried { .. } | RouteOutcome::DeadLettered { .. }
        )
    }
}

/// Publishes failed records to the retry or dead-letter topic.
pub struct ErrorRouter {
    publisher: Arc<dyn RecordPublisher>,
    metrics: Arc<PipelineMetrics>,
    max_retries: u32,
    spool: Option<DeadLetterSpool>,
}

impl ErrorRouter {
    /// Create a router with the standard retry bound.
    pub fn new(publisher: Arc<dyn RecordPublisher>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            publisher,
            metrics,
            max_retries: MAX_RETRIES,
            spool: None,
        }
    }

    /// Write envelopes that cannot be published to `spool`.
    pub fn with_spool(mut self, spool: DeadLetterSpool) -> Self {
        self.spool = Some(spool);
        self
    }

    /// Route one failed record. Never fails; see [`RouteOutcome`].
    pub async fn route(&self, failure: ProcessingError) -> RouteOutcome {
        let decision = RoutingDecision::for_count(failure.retry_count, self.max_retries);
        let topic = decision.topic();
        let envelope = RetryEnvelope::new(
            failure.original_message,
            decision.retry_count(),
            failure.error,
        );

        let published = match envelope.to_vec() {
            Ok(payload) => self.publisher.publish(topic, &payload).await,
            Err(e) => Err(e.into()),
        };

        match published {
            Ok(()) => match decision {
                RoutingDecision::Retry { retry_count } => {
                    self.metrics.record_retry_published();
                    info!(
                        topic = topic,
                        retry_count = retry_count,
                        error = %envelope.error,
                        "Record sent to retry topic"
                    );
                    RouteOutcome::Retried { retry_count }
                }
                RoutingDecision::DeadLetter { retry_count } => {
                    self.metrics.record_dead_lettered();
                    warn!(
                        topic = topic,
                        retry_count = retry_count,
                        error = %envelope.error,
                        "Record sent to dead-letter topic"
                    );
                    RouteOutcome::DeadLettered { retry_count }
                }
            },
            Err(e) => {
                self.metrics.record_routing_failure();
                error!(
                    topic = topic,
                    retry_count = envelope.retry_count,
                    error = %e,
                    "Failed to publish envelope"
                );
                self.spool_envelope(topic, &envelope, e.to_string())
            }
        }
    }

    fn spool_envelope(&self, topic: &str, envelope: &RetryEnvelope, error: String) -> RouteOutcome {
        let Some(spool) = &self.spool else {
            return RouteOutcome::Dropped {
                topic: topic.to_string(),
                error,
            };
        };

        match spool.append(topic, envelope) {
            Ok(()) => {
                self.metrics.record_spooled();
                warn!(
                    topic = topic,
                    path = %spool.path().display(),
                    "Envelope written to local spool"
                );
                RouteOutcome::Spooled {
                    topic: topic.to_string(),
                }
            }
            Err(spool_err) => {
                error!(
                    topic = topic,
                    error = %spool_err,
                    "Failed to spool envelope, record is lost"
                );
                RouteOutcome::Dropped {
                    topic: topic.to_string(),
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::error::StoreError;
    use crate::event::{Event, OriginalMessage};
    use crate::processor::{FailureKind, RecordProcessor};
    use crate::store::EventStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn failure(retry_count: u32) -> ProcessingError {
        ProcessingError {
            original_message: OriginalMessage::document(r#"{"eventId":"e1"}"#).unwrap(),
            retry_count,
            error: "store unavailable".into(),
            kind: FailureKind::Persistence,
        }
    }

    fn router(broker: &InMemoryBroker) -> (ErrorRouter, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let router = ErrorRouter::new(Arc::new(broker.publisher()), Arc::clone(&metrics));
        (router, metrics)
    }

    fn envelopes(broker: &InMemoryBroker, topic: &str) -> Vec<RetryEnvelope> {
        broker
            .records(topic)
            .iter()
            .map(|r| RetryEnvelope::from_slice(r).unwrap())
            .collect()
    }

    #[test]
    fn test_routing_decision() {
        assert_eq!(
            RoutingDecision::for_count(0, MAX_RETRIES),
            RoutingDecision::Retry { retry_count: 1 }
        );
        assert_eq!(
            RoutingDecision::for_count(2, MAX_RETRIES),
            RoutingDecision::Retry { retry_count: 3 }
        );
        assert_eq!(
            RoutingDecision::for_count(3, MAX_RETRIES),
            RoutingDecision::DeadLetter { retry_count: 3 }
        );
        assert_eq!(RoutingDecision::for_count(3, MAX_RETRIES).topic(), DEAD_LETTER_TOPIC);
        assert_eq!(RoutingDecision::for_count(1, MAX_RETRIES).topic(), RETRY_TOPIC);
    }

    #[tokio::test]
    async fn test_first_failure_goes_to_retry() {
        let broker = InMemoryBroker::new();
        let (router, metrics) = router(&broker);

        let outcome = router.route(failure(0)).await;
        assert_eq!(outcome, RouteOutcome::Retried { retry_count: 1 });

        let sent = envelopes(&broker, RETRY_TOPIC);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].retry_count, 1);
        assert_eq!(sent[0].error, "store unavailable");
        assert_eq!(sent[0].original_message, failure(0).original_message);
        assert!(sent[0].timestamp > 0);
        assert_eq!(metrics.retry_published_total(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_failure_goes_to_dead_letter() {
        let broker = InMemoryBroker::new();
        let (router, metrics) = router(&broker);

        let outcome = router.route(failure(3)).await;
        assert_eq!(outcome, RouteOutcome::DeadLettered { retry_count: 3 });
        assert!(broker.records(RETRY_TOPIC).is_empty());
        assert_eq!(envelopes(&broker, DEAD_LETTER_TOPIC)[0].retry_count, 3);
        assert_eq!(metrics.dead_lettered_total(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes_to(RETRY_TOPIC);
        let (router, metrics) = router(&broker);

        let outcome = router.route(failure(0)).await;
        assert!(matches!(outcome, RouteOutcome::Dropped { ref topic, .. } if topic == RETRY_TOPIC));
        assert!(!outcome.is_published());
        assert_eq!(metrics.routing_failures_total(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_spooled() {
        let broker = InMemoryBroker::new();
        broker.fail_publishes_to(DEAD_LETTER_TOPIC);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dlq-spool.jsonl");
        let (router, metrics) = router(&broker);
        let router = router.with_spool(DeadLetterSpool::open(&path).unwrap());

        let outcome = router.route(failure(3)).await;
        assert_eq!(
            outcome,
            RouteOutcome::Spooled {
                topic: DEAD_LETTER_TOPIC.to_string()
            }
        );

        let entries = DeadLetterSpool::read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].envelope.retry_count, 3);
        assert_eq!(metrics.spooled_total(), 1);
        assert_eq!(metrics.routing_failures_total(), 1);
    }

    struct DownStore;

    #[async_trait]
    impl EventStore for DownStore {
        async fn insert(&self, _event: &Event) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_envelope_carries_input_bytes_unchanged() {
        let broker = InMemoryBroker::new();
        let (router, _) = router(&broker);
        let input = r#"{"eventType":"login","eventId":"e1","timestamp":"2024-01-01T00:00:00Z","payload":{"z":1,"a":2}}"#;

        let failure = RecordProcessor::new(Arc::new(DownStore))
            .process(input.as_bytes(), false)
            .await
            .unwrap_err();
        router.route(failure).await;

        let published = String::from_utf8(broker.records(RETRY_TOPIC)[0].clone()).unwrap();
        let expected_prefix = format!(r#"{{"originalMessage":{},"retryCount":1,"#, input);
        assert!(published.starts_with(&expected_prefix), "{}", published);
    }
}
