//! Broker client abstraction.
//!
//! The pipeline talks to the broker only through these traits so that the
//! same consumption, routing and shutdown code runs against Kafka in
//! production and against [`InMemoryBroker`] in development and tests.

mod memory;

pub use memory::{InMemoryBroker, MemoryAdmin, MemoryConsumer, MemoryPublisher};

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A record pulled from a topic, detached from the client that fetched it.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    /// Message value (optional, tombstones have none)
    pub value: Option<Vec<u8>>,

    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Message timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl InboundRecord {
    /// Value bytes, empty for tombstones.
    pub fn value_bytes(&self) -> &[u8] {
        self.value.as_deref().unwrap_or(&[])
    }
}

/// A long-lived client the shutdown coordinator must release.
#[async_trait]
pub trait ManagedClient: Send + Sync {
    /// Release the client. Called exactly once during shutdown.
    async fn disconnect(&self) -> Result<()>;
}

/// One consumer group member subscribed to a single topic.
#[async_trait]
pub trait RecordSource: ManagedClient {
    /// Topic this source is subscribed to.
    fn topic(&self) -> &str;

    /// Wait up to `timeout` for the next record. `None` means nothing arrived.
    async fn poll(&self, timeout: Duration) -> Option<Result<InboundRecord>>;

    /// Acknowledge a record so it is not redelivered to the group.
    async fn commit(&self, record: &InboundRecord) -> Result<()>;
}

/// Producer handle shared by both consumption loops.
///
/// Implementations must be safe for concurrent sends.
#[async_trait]
pub trait RecordPublisher: ManagedClient {
    /// Publish one unkeyed record and wait for the broker's acknowledgement.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Desired shape of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name
    pub name: String,
    /// Number of partitions
    pub partitions: i32,
    /// Replication factor
    pub replication_factor: i32,
}

impl TopicSpec {
    /// Create a topic spec.
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}

/// Administrative handle used for topic provisioning.
#[async_trait]
pub trait TopicAdmin: Send {
    /// Open the administrative connection.
    async fn connect(&mut self) -> Result<()>;

    /// Names of all topics currently known to the cluster.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Create the given topics. Topics that already exist are not an error.
    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<()>;

    /// Close the administrative connection.
    async fn disconnect(&mut self) -> Result<()>;
}
