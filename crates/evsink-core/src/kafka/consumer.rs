//! Kafka consumer group member feeding one consumption loop.
//!
//! Uses CooperativeSticky assignor for minimal rebalance disruption and
//! manual offset commits: an offset is committed only after its record has
//! been persisted or routed, which gives at-least-once delivery.

use crate::broker::{InboundRecord, ManagedClient, RecordSource};
use crate::config::KafkaConfig;
use crate::kafka::client::base_client_config;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::TopicPartitionList;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Builder for creating a Kafka consumer.
pub struct KafkaConsumerBuilder {
    config: KafkaConfig,
    topic: String,
    group_id: String,
}

impl KafkaConsumerBuilder {
    /// Create a builder subscribing to the configured main topic and group.
    pub fn new(config: KafkaConfig) -> Self {
        let topic = config.topic.clone();
        let group_id = config.consumer_group.clone();
        Self {
            config,
            topic,
            group_id,
        }
    }

    /// Subscribe to a different topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Join a different consumer group.
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Build and subscribe the consumer.
    pub fn build(self) -> Result<KafkaRecordConsumer> {
        let mut client_config = base_client_config(&self.config);

        client_config
            .set("group.id", &self.group_id)
            // Manual commits only - we commit after the record is persisted or routed
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            // Must exceed the slowest store write, otherwise the member is
            // evicted from the group mid-record
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky");

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_list(),
                message: e.to_string(),
            })
        })?;

        consumer.subscribe(&[&self.topic]).map_err(|e| {
            Error::Kafka(KafkaError::Subscribe {
                topic: self.topic.clone(),
                message: e.to_string(),
            })
        })?;

        info!(
            topic = %self.topic,
            group = %self.group_id,
            servers = %self.config.bootstrap_list(),
            "Kafka consumer subscribed"
        );

        Ok(KafkaRecordConsumer {
            consumer,
            topic: self.topic,
            group_id: self.group_id,
            closed: AtomicBool::new(false),
        })
    }
}

/// Kafka consumer group member subscribed to a single topic.
pub struct KafkaRecordConsumer {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
    closed: AtomicBool,
}

impl KafkaRecordConsumer {
    /// Commit offset for a specific partition.
    pub async fn commit_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        // Commit offset + 1 (Kafka convention: committed offset is the next offset to read)
        tpl.add_partition_offset(topic, partition, rdkafka::Offset::Offset(offset + 1))
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        debug!(
            topic = %topic,
            partition = %partition,
            offset = %offset,
            "Offset committed"
        );

        Ok(())
    }

    /// Convert a borrowed message to an owned record.
    fn convert_message(msg: &BorrowedMessage) -> InboundRecord {
        InboundRecord {
            value: msg.payload().map(|v| v.to_vec()),
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis().unwrap_or(0),
        }
    }
}

#[async_trait]
impl ManagedClient for KafkaRecordConsumer {
    async fn disconnect(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Kafka(KafkaError::Disconnect(format!(
                "consumer for {} already disconnected",
                self.topic
            ))));
        }

        // Leaving the group triggers a rebalance for the remaining members;
        // the underlying handle is released when the pipeline drops it.
        self.consumer.unsubscribe();

        info!(topic = %self.topic, group = %self.group_id, "Kafka consumer disconnected");
        Ok(())
    }
}

#[async_trait]
impl RecordSource for KafkaRecordConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&self, timeout: Duration) -> Option<Result<InboundRecord>> {
        if self.closed.load(Ordering::SeqCst) {
            return Some(Err(Error::Kafka(KafkaError::ConsumerClosed)));
        }

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(msg)) => Some(Ok(Self::convert_message(&msg))),
            Ok(Err(e)) => Some(Err(Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))),
            Err(_) => None, // Timeout
        }
    }

    async fn commit(&self, record: &InboundRecord) -> Result<()> {
        self.commit_offset(&record.topic, record.partition, record.offset)
            .await
    }
}
