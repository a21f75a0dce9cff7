//! Provision command implementation.

use anyhow::Result;
use evsink_core::kafka::KafkaTopicAdmin;
use evsink_core::topics::{AUX_TOPIC_PARTITIONS, AUX_TOPIC_REPLICATION};
use evsink_core::{Config, TopicProvisioner};

/// Create the retry and dead-letter topics if they are missing.
pub async fn run(config: Config) -> Result<()> {
    println!(
        "Provisioning auxiliary topics on {}...\n",
        config.kafka.bootstrap_list()
    );

    let report = TopicProvisioner::new(KafkaTopicAdmin::new(config.kafka.clone()))
        .ensure_auxiliary_topics()
        .await?;

    for topic in &report.created {
        println!(
            "[CREATED] {} (partitions: {}, replication: {})",
            topic, AUX_TOPIC_PARTITIONS, AUX_TOPIC_REPLICATION
        );
    }
    for topic in &report.existing {
        println!("[EXISTS]  {}", topic);
    }

    if report.is_noop() {
        println!("\nNothing to do, all topics already exist");
    }

    Ok(())
}
