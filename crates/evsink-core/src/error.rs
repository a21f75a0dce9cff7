//! Error types for evsink core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Only startup failures are meant to leave the pipeline as `Err`; per-record
//! failures are modelled separately by [`crate::processor::ProcessingError`].

use thiserror::Error;

/// Result type alias for evsink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for evsink.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Event store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Subscribing a consumer to its topic failed
    #[error("Subscribe to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Cluster metadata could not be fetched
    #[error("Metadata fetch failed: {0}")]
    Metadata(String),

    /// Topic creation failed
    #[error("Topic creation failed for {topic}: {message}")]
    TopicCreation { topic: String, message: String },

    /// Publishing a record failed
    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    /// Client disconnect failed
    #[error("Disconnect failed: {0}")]
    Disconnect(String),

    /// Admin handle used before connect
    #[error("Admin client not connected")]
    AdminNotConnected,

    /// Consumer closed
    #[error("Consumer closed")]
    ConsumerClosed,
}

/// Event store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store could not be reached or opened
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the write
    #[error("Write rejected: {0}")]
    WriteRejected(String),
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let kafka_err = KafkaError::ConnectionFailed {
            broker: "localhost:9092".into(),
            message: "connection refused".into(),
        };
        let err: Error = kafka_err.into();
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_topic_creation_error() {
        let err = KafkaError::TopicCreation {
            topic: "user-events-dlq".into(),
            message: "not authorized".into(),
        };
        assert_eq!(
            err.to_string(),
            "Topic creation failed for user-events-dlq: not authorized"
        );
    }

    #[test]
    fn test_store_error_converts() {
        let err: Error = StoreError::WriteRejected("duplicate".into()).into();
        assert_eq!(err.to_string(), "Store error: Write rejected: duplicate");
    }
}
