//! Kafka backend for the broker traits, built on rdkafka.
//!
//! - [`KafkaRecordConsumer`]: one consumer group member, manual commits,
//!   and cooperative-sticky assignment
//! - [`KafkaPublisher`]: shared `FutureProducer` for retry/dead-letter sends
//! - [`KafkaTopicAdmin`]: admin handle used by topic provisioning

mod admin;
mod client;
mod consumer;
mod producer;

pub use admin::KafkaTopicAdmin;
pub use client::base_client_config;
pub use consumer::{KafkaConsumerBuilder, KafkaRecordConsumer};
pub use producer::KafkaPublisher;
