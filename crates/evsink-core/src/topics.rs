//! Auxiliary topic names and idempotent provisioning.

use crate::broker::{TopicAdmin, TopicSpec};
use crate::Result;
use std::collections::HashSet;
use tracing::{info, warn};

/// Topic holding envelopes of records that still have retries left.
pub const RETRY_TOPIC: &str = "user-events-retry";

/// Terminal topic for records that exhausted their retries.
pub const DEAD_LETTER_TOPIC: &str = "user-events-dlq";

/// Partition count of the retry and dead-letter topics.
pub const AUX_TOPIC_PARTITIONS: i32 = 3;

/// Replication factor of the retry and dead-letter topics.
pub const AUX_TOPIC_REPLICATION: i32 = 1;

/// Suffix appended to the main consumer group for the retry loop.
pub const RETRY_GROUP_SUFFIX: &str = "-retry";

/// Consumer group of the retry loop for a given main group.
pub fn retry_group_id(main_group: &str) -> String {
    format!("{}{}", main_group, RETRY_GROUP_SUFFIX)
}

/// Outcome of a provisioning run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Topics created by this run
    pub created: Vec<String>,
    /// Required topics that already existed
    pub existing: Vec<String>,
}

impl ProvisionReport {
    /// True when nothing had to be created.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
    }
}

/// Ensures the topics the pipeline publishes to exist before consumption starts.
pub struct TopicProvisioner<A: TopicAdmin> {
    admin: A,
}

impl<A: TopicAdmin> TopicProvisioner<A> {
    /// Wrap an admin handle.
    pub fn new(admin: A) -> Self {
        Self { admin }
    }

    /// Ensure the retry and dead-letter topics exist with the standard shape.
    pub async fn ensure_auxiliary_topics(&mut self) -> Result<ProvisionReport> {
        self.ensure_topics(
            &[RETRY_TOPIC, DEAD_LETTER_TOPIC],
            AUX_TOPIC_PARTITIONS,
            AUX_TOPIC_REPLICATION,
        )
        .await
    }

    /// Create whichever of `names` are missing.
    ///
    /// Existing topics are left untouched, so repeated calls create nothing.
    /// The admin handle is disconnected on every path; connect, list and
    /// create failures are returned to the caller.
    pub async fn ensure_topics(
        &mut self,
        names: &[&str],
        partitions: i32,
        replication_factor: i32,
    ) -> Result<ProvisionReport> {
        self.admin.connect().await?;

        let result = self
            .create_missing(names, partitions, replication_factor)
            .await;

        if let Err(e) = self.admin.disconnect().await {
            warn!(error = %e, "Failed to disconnect admin client");
        }

        result
    }

    async fn create_missing(
        &self,
        names: &[&str],
        partitions: i32,
        replication_factor: i32,
    ) -> Result<ProvisionReport> {
        let present: HashSet<String> = self.admin.list_topics().await?.into_iter().collect();

        let mut report = ProvisionReport::default();
        let mut missing = Vec::new();
        for name in names {
            if present.contains(*name) {
                report.existing.push(name.to_string());
            } else if !missing.iter().any(|spec: &TopicSpec| spec.name == *name) {
                missing.push(TopicSpec::new(*name, partitions, replication_factor));
            }
        }

        if !missing.is_empty() {
            self.admin.create_topics(&missing).await?;
            report.created = missing.into_iter().map(|spec| spec.name).collect();
        }

        info!(
            created = ?report.created,
            existing = ?report.existing,
            "Topics provisioned"
        );

        Ok(report)
    }
}
