//! evsink core - at-least-once Kafka event ingestion
//!
//! Consumes user events from a Kafka topic and persists each one to an event
//! store. Records that fail are wrapped in a retry envelope and sent through a
//! bounded retry topic, then to a dead-letter topic:
//!
//! - Idempotent provisioning of the retry and dead-letter topics
//! - Two consumption loops (main and retry) sharing one producer
//! - Manual offset commits after each record is persisted or routed
//! - Ordered client shutdown that never fails the process

pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod processor;
pub mod router;
pub mod spool;
pub mod store;
pub mod topics;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Pipeline, PipelineReport, ShutdownReport};
pub use error::{Error, KafkaError, Result, StoreError};
pub use event::{Event, OriginalMessage, RetryEnvelope};
pub use processor::{FailureKind, ProcessingError, RecordProcessor};
pub use router::{ErrorRouter, RouteOutcome, MAX_RETRIES};
pub use topics::{TopicProvisioner, DEAD_LETTER_TOPIC, RETRY_TOPIC};
