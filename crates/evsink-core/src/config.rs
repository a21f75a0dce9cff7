//! Configuration structures for evsink.
//!
//! Configuration is loaded from TOML files, overridden by the environment
//! variables the deployment has always used (`KAFKA_BROKER_URL`, ...), and
//! finally by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable holding the broker bootstrap address(es).
pub const ENV_BROKER_URL: &str = "KAFKA_BROKER_URL";
/// Environment variable holding the client identifier.
pub const ENV_CLIENT_ID: &str = "KAFKA_CLIENT_ID";
/// Environment variable holding the main consumer group.
pub const ENV_GROUP_ID: &str = "KAFKA_GROUP_ID";
/// Environment variable holding the main topic name.
pub const ENV_TOPIC: &str = "KAFKA_TOPIC";
/// Environment variable selecting a JSONL store file.
pub const ENV_STORE_PATH: &str = "EVSINK_STORE_PATH";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Event store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry / dead-letter routing configuration
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Consumption loop configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka client configuration shared by the producer, both consumers and the
/// admin handle.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    #[serde(default)]
    pub bootstrap_servers: Vec<String>,

    /// Client identifier reported to the brokers
    #[serde(default)]
    pub client_id: String,

    /// Main topic to consume from
    #[serde(default)]
    pub topic: String,

    /// Consumer group ID of the main loop (the retry loop appends a suffix)
    #[serde(default)]
    pub consumer_group: String,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds (must exceed the slowest store write)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Producer delivery timeout in milliseconds
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    /// Timeout for admin metadata requests in milliseconds
    #[serde(default = "default_admin_timeout_ms")]
    pub admin_timeout_ms: u64,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: Vec::new(),
            client_id: String::new(),
            topic: String::new(),
            consumer_group: String::new(),
            session_timeout_ms: default_session_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            auto_offset_reset: OffsetReset::default(),
            message_timeout_ms: default_message_timeout_ms(),
            admin_timeout_ms: default_admin_timeout_ms(),
            security: KafkaSecurityConfig::default(),
        }
    }
}

impl KafkaConfig {
    /// Bootstrap servers as the comma-separated list librdkafka expects.
    pub fn bootstrap_list(&self) -> String {
        self.bootstrap_servers.join(",")
    }
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

impl OffsetReset {
    /// librdkafka value for `auto.offset.reset`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,

    /// SSL client certificate location
    pub ssl_cert_location: Option<PathBuf>,

    /// SSL client key location
    pub ssl_key_location: Option<PathBuf>,
}

/// Event store configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// File path for the `jsonl` backend
    pub path: Option<PathBuf>,
}

/// Event store backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store, contents are lost on exit
    #[default]
    Memory,
    /// Append-only JSON lines file
    Jsonl,
}

/// Retry / dead-letter routing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Local spool file for envelopes that could not be published.
    /// When unset, routing failures are only logged.
    pub spool_path: Option<PathBuf>,
}

/// Consumption loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// How long a single poll waits before re-checking for shutdown
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Upper bound on waiting for in-flight records during shutdown
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            drain_timeout_seconds: default_drain_timeout_seconds(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive usable with `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_heartbeat_interval_ms() -> u32 {
    3000
}
fn default_max_poll_interval_ms() -> u32 {
    300000
}
fn default_message_timeout_ms() -> u64 {
    30000
}
fn default_admin_timeout_ms() -> u64 {
    10000
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_drain_timeout_seconds() -> u64 {
    30
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Parse a TOML file without overrides or validation.
    pub fn read_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(servers) = get(ENV_BROKER_URL) {
            self.kafka.bootstrap_servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(client_id) = get(ENV_CLIENT_ID) {
            self.kafka.client_id = client_id;
        }
        if let Some(group) = get(ENV_GROUP_ID) {
            self.kafka.consumer_group = group;
        }
        if let Some(topic) = get(ENV_TOPIC) {
            self.kafka.topic = topic;
        }
        if let Some(path) = get(ENV_STORE_PATH) {
            self.store.backend = StoreBackend::Jsonl;
            self.store.path = Some(PathBuf::from(path));
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.client_id.is_empty() {
            return Err(crate::Error::Config("Kafka client id is required".into()));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.kafka.topic == crate::topics::RETRY_TOPIC
            || self.kafka.topic == crate::topics::DEAD_LETTER_TOPIC
        {
            return Err(crate::Error::Config(format!(
                "Main topic must not be the retry or dead-letter topic: {}",
                self.kafka.topic
            )));
        }

        if self.store.backend == StoreBackend::Jsonl && self.store.path.is_none() {
            return Err(crate::Error::Config(
                "Store path is required for the jsonl backend".into(),
            ));
        }

        if self.pipeline.poll_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "Poll timeout must be greater than zero".into(),
            ));
        }

        if self.kafka.heartbeat_interval_ms >= self.kafka.session_timeout_ms {
            tracing::warn!(
                heartbeat_ms = self.kafka.heartbeat_interval_ms,
                session_ms = self.kafka.session_timeout_ms,
                "Heartbeat interval should be well below the session timeout"
            );
        }

        Ok(())
    }
}
