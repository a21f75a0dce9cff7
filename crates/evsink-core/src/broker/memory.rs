//! In-process broker for local development and tests.
//!
//! Each topic is a single append-only log (partition 0). Consumer groups keep
//! committed offsets, so a consumer created for a group resumes after its last
//! commit or, for a new group, from the beginning of the log.

use super::{InboundRecord, ManagedClient, RecordPublisher, RecordSource, TopicAdmin, TopicSpec};
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Vec<u8>,
    timestamp: i64,
}

#[derive(Debug)]
struct TopicLog {
    spec: TopicSpec,
    records: Vec<StoredRecord>,
}

#[derive(Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, TopicLog>>,
    /// (group, topic) -> next offset to read
    committed: Mutex<HashMap<(String, String), i64>>,
    failing_topics: Mutex<HashSet<String>>,
    appended: Notify,
    topics_created: AtomicU64,
    admin_disconnects: AtomicU64,
}

impl BrokerState {
    fn create_topic(&self, spec: &TopicSpec) -> bool {
        let mut topics = self.topics.lock();
        if topics.contains_key(&spec.name) {
            return false;
        }
        topics.insert(
            spec.name.clone(),
            TopicLog {
                spec: spec.clone(),
                records: Vec::new(),
            },
        );
        self.topics_created.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn append(&self, topic: &str, payload: &[u8]) -> i64 {
        let offset = {
            let mut topics = self.topics.lock();
            let log = topics.entry(topic.to_string()).or_insert_with(|| TopicLog {
                spec: TopicSpec::new(topic, 1, 1),
                records: Vec::new(),
            });
            log.records.push(StoredRecord {
                value: payload.to_vec(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
            (log.records.len() - 1) as i64
        };
        self.appended.notify_waiters();
        offset
    }

    fn read(&self, topic: &str, offset: i64) -> Option<StoredRecord> {
        let topics = self.topics.lock();
        topics
            .get(topic)
            .and_then(|log| log.records.get(offset as usize))
            .cloned()
    }
}

/// In-memory broker shared by producers, consumers and the admin handle.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic. Returns `false` if it already existed.
    pub fn create_topic(&self, spec: TopicSpec) -> bool {
        self.state.create_topic(&spec)
    }

    /// Append a record as an upstream producer would. Returns its offset.
    pub fn produce(&self, topic: &str, payload: impl AsRef<[u8]>) -> i64 {
        self.state.append(topic, payload.as_ref())
    }

    /// All record values on a topic, in offset order.
    pub fn records(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|log| log.records.iter().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Shape a topic was created with.
    pub fn topic_spec(&self, topic: &str) -> Option<TopicSpec> {
        self.state.topics.lock().get(topic).map(|log| log.spec.clone())
    }

    /// Number of topics created through [`InMemoryBroker::create_topic`] or an admin handle.
    pub fn topics_created(&self) -> u64 {
        self.state.topics_created.load(Ordering::SeqCst)
    }

    /// Number of times an admin handle has been disconnected.
    pub fn admin_disconnects(&self) -> u64 {
        self.state.admin_disconnects.load(Ordering::SeqCst)
    }

    /// Next offset the group will read on `topic`, if it has committed.
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<i64> {
        self.state
            .committed
            .lock()
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// Make every publish to `topic` fail until [`InMemoryBroker::restore_publishes_to`].
    pub fn fail_publishes_to(&self, topic: &str) {
        self.state.failing_topics.lock().insert(topic.to_string());
    }

    /// Undo [`InMemoryBroker::fail_publishes_to`].
    pub fn restore_publishes_to(&self, topic: &str) {
        self.state.failing_topics.lock().remove(topic);
    }

    /// Join `group` as a consumer of `topic`.
    pub fn consumer(&self, topic: &str, group: &str) -> MemoryConsumer {
        let position = self.committed_offset(group, topic).unwrap_or(0);
        MemoryConsumer {
            state: Arc::clone(&self.state),
            topic: topic.to_string(),
            group: group.to_string(),
            position: Mutex::new(position),
            closed: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
        }
    }

    /// Producer handle.
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
        }
    }

    /// Administrative handle.
    pub fn admin(&self) -> MemoryAdmin {
        MemoryAdmin {
            state: Arc::clone(&self.state),
            connected: false,
            fail_create: false,
        }
    }
}

/// Consumer group member on an [`InMemoryBroker`] topic.
pub struct MemoryConsumer {
    state: Arc<BrokerState>,
    topic: String,
    group: String,
    position: Mutex<i64>,
    closed: AtomicBool,
    fail_disconnect: AtomicBool,
}

impl MemoryConsumer {
    /// Make the next disconnect report an error.
    pub fn fail_on_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    /// Whether disconnect has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Consumer group of this member.
    pub fn group(&self) -> &str {
        &self.group
    }

    fn try_next(&self) -> Option<InboundRecord> {
        let mut position = self.position.lock();
        let stored = self.state.read(&self.topic, *position)?;
        let record = InboundRecord {
            value: Some(stored.value),
            topic: self.topic.clone(),
            partition: 0,
            offset: *position,
            timestamp: stored.timestamp,
        };
        *position += 1;
        Some(record)
    }
}

#[async_trait]
impl ManagedClient for MemoryConsumer {
    async fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.appended.notify_waiters();
        if self.fail_disconnect.swap(false, Ordering::SeqCst) {
            return Err(Error::Kafka(KafkaError::Disconnect(format!(
                "consumer {} on {} failed to leave group",
                self.group, self.topic
            ))));
        }
        debug!(topic = %self.topic, group = %self.group, "Memory consumer disconnected");
        Ok(())
    }
}

#[async_trait]
impl RecordSource for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&self, timeout: Duration) -> Option<Result<InboundRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so an append in between is not missed.
            let appended = self.state.appended.notified();

            if self.is_closed() {
                return Some(Err(Error::Kafka(KafkaError::ConsumerClosed)));
            }
            if let Some(record) = self.try_next() {
                return Some(Ok(record));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, appended).await.is_err() {
                return None;
            }
        }
    }

    async fn commit(&self, record: &InboundRecord) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Kafka(KafkaError::OffsetCommit(
                "consumer is closed".into(),
            )));
        }
        let mut committed = self.state.committed.lock();
        let next = committed
            .entry((self.group.clone(), record.topic.clone()))
            .or_insert(0);
        *next = (*next).max(record.offset + 1);
        Ok(())
    }
}

/// Producer handle on an [`InMemoryBroker`].
pub struct MemoryPublisher {
    state: Arc<BrokerState>,
    closed: AtomicBool,
    fail_disconnect: AtomicBool,
}

impl MemoryPublisher {
    /// Make the next disconnect report an error.
    pub fn fail_on_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    /// Whether disconnect has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedClient for MemoryPublisher {
    async fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_disconnect.swap(false, Ordering::SeqCst) {
            return Err(Error::Kafka(KafkaError::Disconnect(
                "producer flush failed".into(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Kafka(KafkaError::Publish {
                topic: topic.to_string(),
                message: "producer is closed".into(),
            }));
        }
        if self.state.failing_topics.lock().contains(topic) {
            return Err(Error::Kafka(KafkaError::Publish {
                topic: topic.to_string(),
                message: "broker rejected the record".into(),
            }));
        }
        self.state.append(topic, payload);
        Ok(())
    }
}

/// Administrative handle on an [`InMemoryBroker`].
pub struct MemoryAdmin {
    state: Arc<BrokerState>,
    connected: bool,
    fail_create: bool,
}

impl MemoryAdmin {
    /// Make topic creation fail.
    pub fn with_create_failure(mut self) -> Self {
        self.fail_create = true;
        self
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::Kafka(KafkaError::AdminNotConnected))
        }
    }
}

#[async_trait]
impl TopicAdmin for MemoryAdmin {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok(self.state.topics.lock().keys().cloned().collect())
    }

    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<()> {
        self.ensure_connected()?;
        if self.fail_create {
            let name = topics.first().map(|t| t.name.clone()).unwrap_or_default();
            return Err(Error::Kafka(KafkaError::TopicCreation {
                topic: name,
                message: "cluster authorization failed".into(),
            }));
        }
        for spec in topics {
            self.state.create_topic(spec);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        self.state.admin_disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consumer_reads_from_beginning() {
        let broker = InMemoryBroker::new();
        broker.produce("events", b"a");
        broker.produce("events", b"b");

        let consumer = broker.consumer("events", "group");
        let first = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(first.value_bytes(), b"a");
        assert_eq!(first.offset, 0);
        assert_eq!(second.value_bytes(), b"b");
        assert_eq!(second.offset, 1);
        assert!(consumer.poll(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_new_member_resumes_after_commit() {
        let broker = InMemoryBroker::new();
        broker.produce("events", b"a");
        broker.produce("events", b"b");

        let consumer = broker.consumer("events", "group");
        let first = consumer.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        consumer.commit(&first).await.unwrap();
        assert_eq!(broker.committed_offset("group", "events"), Some(1));

        // Uncommitted record is redelivered to the next member.
        let _ = consumer.poll(Duration::from_millis(10)).await;
        let replacement = broker.consumer("events", "group");
        let redelivered = replacement
            .poll(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.value_bytes(), b"b");
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let broker = InMemoryBroker::new();
        broker.produce("events", b"a");

        let a = broker.consumer("events", "group-a");
        let b = broker.consumer("events", "group-b");
        assert!(a.poll(Duration::from_millis(10)).await.is_some());
        assert!(b.poll(Duration::from_millis(10)).await.is_some());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let consumer = broker.consumer("events", "group");
        let publisher = broker.publisher();

        let handle = tokio::spawn(async move { consumer.poll(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish("events", b"late").await.unwrap();

        let record = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(record.value_bytes(), b"late");
    }

    #[tokio::test]
    async fn test_failing_publish() {
        let broker = InMemoryBroker::new();
        let publisher = broker.publisher();
        broker.fail_publishes_to("dlq");

        assert!(publisher.publish("dlq", b"x").await.is_err());
        assert!(broker.records("dlq").is_empty());

        broker.restore_publishes_to("dlq");
        assert!(publisher.publish("dlq", b"x").await.is_ok());
        assert_eq!(broker.records("dlq").len(), 1);
    }

    #[tokio::test]
    async fn test_closed_consumer_reports_error() {
        let broker = InMemoryBroker::new();
        let consumer = broker.consumer("events", "group");
        consumer.fail_on_disconnect();

        assert!(consumer.disconnect().await.is_err());
        assert!(consumer.is_closed());
        assert!(matches!(
            consumer.poll(Duration::from_millis(10)).await,
            Some(Err(Error::Kafka(KafkaError::ConsumerClosed)))
        ));
    }

    #[tokio::test]
    async fn test_admin_requires_connect() {
        let broker = InMemoryBroker::new();
        let mut admin = broker.admin();
        assert!(admin.list_topics().await.is_err());

        admin.connect().await.unwrap();
        admin
            .create_topics(&[TopicSpec::new("retry", 3, 1)])
            .await
            .unwrap();
        assert_eq!(admin.list_topics().await.unwrap(), vec!["retry".to_string()]);
        assert_eq!(broker.topic_spec("retry").unwrap().partitions, 3);

        admin.disconnect().await.unwrap();
        assert_eq!(broker.admin_disconnects(), 1);
    }
}
