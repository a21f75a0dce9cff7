//! Pull loop shared by the main and retry topics.
//!
//! Each loop processes one record at a time: poll, process, route on failure,
//! then commit. Shutdown is only observed while waiting for the next record,
//! so an in-flight record always reaches its commit.

use super::backoff::PollBackoff;
use crate::broker::{InboundRecord, RecordSource};
use crate::health::{
    HealthCheck, COMPONENT_MAIN_LOOP, COMPONENT_PRODUCER, COMPONENT_RETRY_LOOP, COMPONENT_STORE,
};
use crate::metrics::PipelineMetrics;
use crate::processor::{FailureKind, RecordProcessor};
use crate::router::{ErrorRouter, RouteOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default time a single poll waits before re-checking for shutdown.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive poll errors after which a loop reports itself unhealthy.
pub const UNHEALTHY_AFTER_POLL_ERRORS: u32 = 5;

/// Which topic a loop drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopRole {
    /// The configured main topic; records are raw events
    Main,
    /// The retry topic; records are retry envelopes
    Retry,
}

impl LoopRole {
    /// Whether records on this loop's topic are envelopes.
    pub fn is_retry(&self) -> bool {
        matches!(self, LoopRole::Retry)
    }

    /// Label value for metrics and logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            LoopRole::Main => "main",
            LoopRole::Retry => "retry",
        }
    }

    /// Health component tracking this loop.
    pub fn component(&self) -> &'static str {
        match self {
            LoopRole::Main => COMPONENT_MAIN_LOOP,
            LoopRole::Retry => COMPONENT_RETRY_LOOP,
        }
    }
}

/// Result of handling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored under the given identifier
    Persisted(String),
    /// Processing failed and the router took over
    Routed(RouteOutcome),
}

/// Per-loop counters returned when a loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Records pulled from the topic
    pub consumed: u64,
    /// Records stored
    pub persisted: u64,
    /// Records published to the retry topic
    pub retried: u64,
    /// Records published to the dead-letter topic
    pub dead_lettered: u64,
    /// Records whose envelope could not be published
    pub routing_failures: u64,
    /// Offset commits that failed
    pub commit_failures: u64,
    /// Poll errors
    pub poll_errors: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: &RecordOutcome) {
        self.consumed += 1;
        match outcome {
            RecordOutcome::Persisted(_) => self.persisted += 1,
            RecordOutcome::Routed(RouteOutcome::Retried { .. }) => self.retried += 1,
            RecordOutcome::Routed(RouteOutcome::DeadLettered { .. }) => self.dead_lettered += 1,
            RecordOutcome::Routed(_) => self.routing_failures += 1,
        }
    }
}

/// One consumption loop bound to a single topic.
pub struct ConsumptionLoop {
    role: LoopRole,
    source: Arc<dyn RecordSource>,
    processor: RecordProcessor,
    router: Arc<ErrorRouter>,
    metrics: Arc<PipelineMetrics>,
    health: Arc<HealthCheck>,
    poll_timeout: Duration,
    backoff: PollBackoff,
    commit_failures: u64,
}

impl ConsumptionLoop {
    /// Create a loop.
    pub fn new(
        role: LoopRole,
        source: Arc<dyn RecordSource>,
        processor: RecordProcessor,
        router: Arc<ErrorRouter>,
        metrics: Arc<PipelineMetrics>,
        health: Arc<HealthCheck>,
    ) -> Self {
        Self {
            role,
            source,
            processor,
            router,
            metrics,
            health,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            backoff: PollBackoff::default(),
            commit_failures: 0,
        }
    }

    /// Override how long one poll waits.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Run until a shutdown signal arrives, then return the loop's counters.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> LoopStats {
        let mut stats = LoopStats::default();
        let mut consecutive_errors: u32 = 0;
        let component = self.role.component();

        self.health.mark_healthy(component);
        info!(
            role = self.role.as_label(),
            topic = %self.source.topic(),
            "Consumption loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    debug!(role = self.role.as_label(), "Shutdown signal received");
                    break;
                }

                polled = self.source.poll(self.poll_timeout) => match polled {
                    None => {}
                    Some(Ok(record)) => {
                        if consecutive_errors > 0 {
                            consecutive_errors = 0;
                            self.health.mark_healthy(component);
                        }
                        let outcome = self.handle_record(&record).await;
                        stats.record(&outcome);
                    }
                    Some(Err(e)) => {
                        stats.poll_errors += 1;
                        self.metrics.record_poll_error();
                        let delay = self.backoff.calculate_delay(consecutive_errors);
                        consecutive_errors = consecutive_errors.saturating_add(1);

                        warn!(
                            role = self.role.as_label(),
                            error = %e,
                            attempt = consecutive_errors,
                            delay_ms = delay.as_millis() as u64,
                            "Poll failed, backing off"
                        );
                        if consecutive_errors >= UNHEALTHY_AFTER_POLL_ERRORS {
                            self.health.mark_unhealthy(component, &e.to_string());
                        } else {
                            self.health.mark_degraded(component, &e.to_string());
                        }

                        tokio::select! {
                            biased;
                            _ = shutdown_rx.recv() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        stats.commit_failures = self.commit_failures;
        info!(
            role = self.role.as_label(),
            consumed = stats.consumed,
            persisted = stats.persisted,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            routing_failures = stats.routing_failures,
            "Consumption loop stopped"
        );
        stats
    }

    /// Process one record, route it on failure, then commit its offset.
    pub async fn handle_record(&mut self, record: &InboundRecord) -> RecordOutcome {
        let started = Instant::now();
        self.metrics.record_consumed(self.role);

        debug!(
            role = self.role.as_label(),
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            timestamp = record.timestamp,
            "Record received"
        );

        let outcome = match self
            .processor
            .process(record.value_bytes(), self.role.is_retry())
            .await
        {
            Ok(id) => {
                self.metrics.record_persisted();
                self.health.mark_healthy(COMPONENT_STORE);
                RecordOutcome::Persisted(id)
            }
            Err(failure) => {
                self.metrics.record_failure(failure.kind);
                warn!(
                    role = self.role.as_label(),
                    kind = %failure.kind,
                    retry_count = failure.retry_count,
                    offset = record.offset,
                    error = %failure.error,
                    "Record processing failed"
                );
                if failure.kind == FailureKind::Persistence {
                    self.health.mark_degraded(COMPONENT_STORE, &failure.error);
                }

                let routed = self.router.route(failure).await;
                match &routed {
                    RouteOutcome::Retried { .. } | RouteOutcome::DeadLettered { .. } => {
                        self.health.mark_healthy(COMPONENT_PRODUCER)
                    }
                    RouteOutcome::Spooled { topic } | RouteOutcome::Dropped { topic, .. } => self
                        .health
                        .mark_degraded(COMPONENT_PRODUCER, &format!("publish to {} failed", topic)),
                }
                RecordOutcome::Routed(routed)
            }
        };

        self.metrics.record_processing_duration(started.elapsed());

        if let Err(e) = self.source.commit(record).await {
            self.commit_failures += 1;
            self.metrics.record_commit_failure();
            error!(
                role = self.role.as_label(),
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Offset commit failed, record may be redelivered"
            );
        }

        outcome
    }
}
