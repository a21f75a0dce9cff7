//! Pipeline assembly and lifecycle.
//!
//! Startup order: provision the retry and dead-letter topics, create the
//! producer, subscribe both consumers, open the store. Any failure there is
//! returned to the caller. Once running, nothing but the shutdown signal
//! stops the pipeline.

use super::consumption::{ConsumptionLoop, LoopRole, LoopStats};
use super::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::broker::{ManagedClient, RecordPublisher, RecordSource};
use crate::config::{Config, PipelineConfig};
use crate::health::HealthCheck;
use crate::kafka::{KafkaConsumerBuilder, KafkaPublisher, KafkaTopicAdmin};
use crate::metrics::PipelineMetrics;
use crate::processor::RecordProcessor;
use crate::router::ErrorRouter;
use crate::spool::DeadLetterSpool;
use crate::store::{self, EventStore};
use crate::topics::{retry_group_id, TopicProvisioner, RETRY_TOPIC};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Client names used in shutdown reports.
pub const MAIN_CONSUMER: &str = "main-consumer";
/// Retry consumer name used in shutdown reports.
pub const RETRY_CONSUMER: &str = "retry-consumer";
/// Producer name used in shutdown reports.
pub const PRODUCER: &str = "producer";

/// Summary of a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Main loop counters, absent if the loop did not stop in time
    pub main_loop: Option<LoopStats>,
    /// Retry loop counters, absent if the loop did not stop in time
    pub retry_loop: Option<LoopStats>,
    /// Client disconnect results
    pub shutdown: ShutdownReport,
}

/// The ingestion pipeline: two consumption loops sharing one producer.
pub struct Pipeline {
    main_source: Arc<dyn RecordSource>,
    retry_source: Arc<dyn RecordSource>,
    publisher: Arc<dyn RecordPublisher>,
    coordinator: ShutdownCoordinator,
    processor: RecordProcessor,
    spool: Option<DeadLetterSpool>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: broadcast::Sender<()>,
    // Held so a signal sent before `run` is not lost.
    shutdown_rx: broadcast::Receiver<()>,
}

impl Pipeline {
    /// Assemble a pipeline from already-connected clients.
    ///
    /// The clients are disconnected by [`Pipeline::run`] in the order main
    /// consumer, retry consumer, producer.
    pub fn new<S, P>(
        main: Arc<S>,
        retry: Arc<S>,
        publisher: Arc<P>,
        store: Arc<dyn EventStore>,
        config: PipelineConfig,
    ) -> Self
    where
        S: RecordSource + 'static,
        P: RecordPublisher + 'static,
    {
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(MAIN_CONSUMER, Arc::clone(&main) as Arc<dyn ManagedClient>);
        coordinator.register(RETRY_CONSUMER, Arc::clone(&retry) as Arc<dyn ManagedClient>);
        coordinator.register(PRODUCER, Arc::clone(&publisher) as Arc<dyn ManagedClient>);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Self {
            main_source: main,
            retry_source: retry,
            publisher,
            coordinator,
            processor: RecordProcessor::new(store),
            spool: None,
            config,
            metrics: Arc::new(PipelineMetrics::new()),
            health: Arc::new(HealthCheck::for_pipeline()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Connect to Kafka and assemble the pipeline described by `config`.
    pub async fn connect(config: &Config) -> Result<Pipeline> {
        config.validate()?;

        let report = TopicProvisioner::new(KafkaTopicAdmin::new(config.kafka.clone()))
            .ensure_auxiliary_topics()
            .await?;
        if !report.is_noop() {
            info!(created = ?report.created, "Auxiliary topics created");
        }

        let publisher = Arc::new(KafkaPublisher::new(&config.kafka)?);

        let main = Arc::new(KafkaConsumerBuilder::new(config.kafka.clone()).build()?);
        let retry = Arc::new(
            KafkaConsumerBuilder::new(config.kafka.clone())
                .topic(RETRY_TOPIC)
                .group_id(retry_group_id(&config.kafka.consumer_group))
                .build()?,
        );

        let store = store::open(&config.store)?;

        let mut pipeline = Pipeline::new(main, retry, publisher, store, config.pipeline.clone());
        if let Some(path) = &config.routing.spool_path {
            pipeline = pipeline.with_spool(DeadLetterSpool::open(path)?);
        }

        Ok(pipeline)
    }

    /// Write envelopes that cannot be published to a local spool.
    pub fn with_spool(mut self, spool: DeadLetterSpool) -> Self {
        self.spool = Some(spool);
        self
    }

    /// Get metrics.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Get health check.
    pub fn health(&self) -> Arc<HealthCheck> {
        Arc::clone(&self.health)
    }

    /// Get shutdown signal sender. Sending on it stops [`Pipeline::run`].
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run both loops until the shutdown signal, then drain them and release
    /// every client.
    pub async fn run(mut self) -> PipelineReport {
        self.health.pipeline_started();
        info!(
            main_topic = %self.main_source.topic(),
            retry_topic = %self.retry_source.topic(),
            "Pipeline started"
        );

        let mut router = ErrorRouter::new(Arc::clone(&self.publisher), Arc::clone(&self.metrics));
        if let Some(spool) = self.spool.take() {
            router = router.with_spool(spool);
        }
        let router = Arc::new(router);

        let poll_timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let (stop_tx, _) = broadcast::channel(1);

        let main_handle = self.spawn_loop(
            LoopRole::Main,
            Arc::clone(&self.main_source),
            &router,
            poll_timeout,
            stop_tx.subscribe(),
        );
        let retry_handle = self.spawn_loop(
            LoopRole::Retry,
            Arc::clone(&self.retry_source),
            &router,
            poll_timeout,
            stop_tx.subscribe(),
        );

        // Any outcome (signal, lag, all senders gone) means stop.
        let _ = self.shutdown_rx.recv().await;
        info!("Shutdown signal received, draining consumption loops");
        let _ = stop_tx.send(());

        let drain_timeout = Duration::from_secs(self.config.drain_timeout_seconds);
        let deadline = Instant::now() + drain_timeout;

        let report = PipelineReport {
            main_loop: self.drain(LoopRole::Main, main_handle, deadline).await,
            retry_loop: self.drain(LoopRole::Retry, retry_handle, deadline).await,
            shutdown: self.coordinator.shutdown().await,
        };
        self.health.pipeline_stopped();
        info!(clean = report.shutdown.is_clean(), "Pipeline stopped");

        report
    }

    fn spawn_loop(
        &self,
        role: LoopRole,
        source: Arc<dyn RecordSource>,
        router: &Arc<ErrorRouter>,
        poll_timeout: Duration,
        stop_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<LoopStats> {
        let consumption = ConsumptionLoop::new(
            role,
            source,
            self.processor.clone(),
            Arc::clone(router),
            Arc::clone(&self.metrics),
            Arc::clone(&self.health),
        )
        .with_poll_timeout(poll_timeout);

        tokio::spawn(consumption.run(stop_rx))
    }

    /// Wait for a loop to stop, aborting it once `deadline` passes.
    async fn drain(
        &self,
        role: LoopRole,
        mut handle: JoinHandle<LoopStats>,
        deadline: Instant,
    ) -> Option<LoopStats> {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                error!(role = role.as_label(), error = %e, "Consumption loop panicked");
                self.health
                    .mark_unhealthy(role.component(), "consumption loop panicked");
                None
            }
            Err(_) => {
                warn!(
                    role = role.as_label(),
                    timeout_secs = self.config.drain_timeout_seconds,
                    "Drain timeout exceeded, aborting consumption loop"
                );
                handle.abort();
                self.health.mark_unhealthy(role.component(), "drain timed out");
                None
            }
        }
    }
}
