//! Kafka admin handle used by topic provisioning.

use crate::broker::{TopicAdmin, TopicSpec};
use crate::config::KafkaConfig;
use crate::kafka::client::base_client_config;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type Admin = AdminClient<DefaultClientContext>;

/// rdkafka admin client wrapped in the connect / disconnect lifecycle.
pub struct KafkaTopicAdmin {
    config: KafkaConfig,
    timeout: Duration,
    client: Option<Arc<Admin>>,
}

impl KafkaTopicAdmin {
    /// Create a disconnected admin handle.
    pub fn new(config: KafkaConfig) -> Self {
        let timeout = Duration::from_millis(config.admin_timeout_ms);
        Self {
            config,
            timeout,
            client: None,
        }
    }

    fn client(&self) -> Result<&Arc<Admin>> {
        self.client
            .as_ref()
            .ok_or(Error::Kafka(KafkaError::AdminNotConnected))
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn connect(&mut self) -> Result<()> {
        let admin: Admin = base_client_config(&self.config).create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_list(),
                message: e.to_string(),
            })
        })?;

        self.client = Some(Arc::new(admin));
        debug!(servers = %self.config.bootstrap_list(), "Kafka admin connected");
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let client = Arc::clone(self.client()?);
        let timeout = self.timeout;

        // Metadata requests block the calling thread.
        let metadata = tokio::task::spawn_blocking(move || {
            client
                .inner()
                .fetch_metadata(None, timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .map(|t| t.name().to_string())
                        .collect::<Vec<_>>()
                })
        })
        .await
        .map_err(|e| Error::Kafka(KafkaError::Metadata(e.to_string())))?;

        metadata.map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_list(),
                message: e.to_string(),
            })
        })
    }

    async fn create_topics(&self, topics: &[TopicSpec]) -> Result<()> {
        let client = self.client()?;

        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|spec| {
                NewTopic::new(
                    &spec.name,
                    spec.partitions,
                    TopicReplication::Fixed(spec.replication_factor),
                )
            })
            .collect();

        let options = AdminOptions::new().operation_timeout(Some(self.timeout));
        let results = client
            .create_topics(&new_topics, &options)
            .await
            .map_err(|e| {
                Error::Kafka(KafkaError::TopicCreation {
                    topic: topics
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                    message: e.to_string(),
                })
            })?;

        for result in results {
            match result {
                Ok(topic) => info!(topic = %topic, "Topic created"),
                // Another instance won the race; the topic is there either way.
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %topic, "Topic already exists")
                }
                Err((topic, code)) => {
                    return Err(Error::Kafka(KafkaError::TopicCreation {
                        topic,
                        message: code.to_string(),
                    }));
                }
            }
        }

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Dropping the last reference stops the admin polling thread.
        if self.client.take().is_some() {
            debug!("Kafka admin disconnected");
        }
        Ok(())
    }
}
