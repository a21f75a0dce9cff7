//! Producer used by the error router.
//!
//! `FutureProducer` is `Send + Sync` and internally queues sends, so a single
//! instance is shared by both consumption loops without extra locking.

use crate::broker::{ManagedClient, RecordPublisher};
use crate::config::KafkaConfig;
use crate::kafka::client::base_client_config;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum time to wait for queued sends during disconnect.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka producer for envelope sends.
pub struct KafkaPublisher {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    /// Create the producer.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let mut client_config = base_client_config(config);

        client_config
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            // Envelopes must not be silently dropped by the broker
            .set("acks", "all")
            .set("enable.idempotence", "true");

        let producer: FutureProducer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: config.bootstrap_list(),
                message: e.to_string(),
            })
        })?;

        info!(servers = %config.bootstrap_list(), "Kafka producer created");

        Ok(Self {
            producer,
            delivery_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }
}

#[async_trait]
impl ManagedClient for KafkaPublisher {
    async fn disconnect(&self) -> Result<()> {
        let producer = self.producer.clone();

        // Flushing blocks the calling thread until the queue drains.
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| Error::Kafka(KafkaError::Disconnect(e.to_string())))?
            .map_err(|e| Error::Kafka(KafkaError::Disconnect(e.to_string())))?;
        info!("Kafka producer flushed and disconnected");
        Ok(())
    }
}

#[async_trait]
impl RecordPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
            .map_err(|(err, _)| {
                Error::Kafka(KafkaError::Publish {
                    topic: topic.to_string(),
                    message: err.to_string(),
                })
            })?;

        debug!(
            topic = %topic,
            partition = partition,
            offset = offset,
            "Record delivered"
        );
        Ok(())
    }
}
