//! Prometheus metrics export.

use crate::engine::LoopRole;
use crate::processor::FailureKind;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for record processing duration.
/// Converts to seconds: [0.005, 0.025, 0.1, 0.25, 1.0, 5.0, 10.0]
const PROCESSING_DURATION_BUCKETS_MS: [u64; 7] = [5, 25, 100, 250, 1000, 5000, 10000];

const DEFAULT_PREFIX: &str = "evsink";

/// Counters and histograms shared by both consumption loops and the router.
#[derive(Default)]
pub struct PipelineMetrics {
    // === COUNTERS ===
    /// Records pulled from the main topic
    consumed_main: AtomicU64,
    /// Records pulled from the retry topic
    consumed_retry: AtomicU64,

    /// Events inserted into the store
    persisted_total: AtomicU64,

    /// Processing failures by kind
    failures_decode: AtomicU64,
    failures_envelope: AtomicU64,
    failures_validation: AtomicU64,
    failures_persistence: AtomicU64,

    /// Envelopes published to the retry topic
    retry_published_total: AtomicU64,

    /// Envelopes published to the dead-letter topic
    dead_lettered_total: AtomicU64,

    /// Envelopes that could not be published anywhere
    routing_failures_total: AtomicU64,

    /// Unpublishable envelopes written to the local spool
    spooled_total: AtomicU64,

    /// Offset commits that failed
    commit_failures_total: AtomicU64,

    /// Poll errors absorbed with backoff
    poll_errors_total: AtomicU64,

    // === HISTOGRAM: processing_duration_seconds ===
    processing_duration_sum_ms: AtomicU64,
    processing_duration_count: AtomicU64,
    /// Buckets: [0.005s, 0.025s, 0.1s, 0.25s, 1.0s, 5.0s, 10.0s, +Inf]
    processing_duration_buckets: [AtomicU64; 8],
}

impl PipelineMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    // === COUNTER RECORDING ===

    /// Record a record pulled by one of the loops.
    pub fn record_consumed(&self, role: LoopRole) {
        match role {
            LoopRole::Main => self.consumed_main.fetch_add(1, Ordering::Relaxed),
            LoopRole::Retry => self.consumed_retry.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a successful insert.
    pub fn record_persisted(&self) {
        self.persisted_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processing failure.
    pub fn record_failure(&self, kind: FailureKind) {
        self.failure_counter(kind).fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope published to the retry topic.
    pub fn record_retry_published(&self) {
        self.retry_published_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope published to the dead-letter topic.
    pub fn record_dead_lettered(&self) {
        self.dead_lettered_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope that could not be published.
    pub fn record_routing_failure(&self) {
        self.routing_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope written to the local spool.
    pub fn record_spooled(&self) {
        self.spooled_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed offset commit.
    pub fn record_commit_failure(&self) {
        self.commit_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a poll error.
    pub fn record_poll_error(&self) {
        self.poll_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one record took from poll to routing decision.
    pub fn record_processing_duration(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.processing_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.processing_duration_count
            .fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in PROCESSING_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.processing_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.processing_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    // === GETTERS ===

    /// Records pulled by a loop.
    pub fn consumed(&self, role: LoopRole) -> u64 {
        match role {
            LoopRole::Main => self.consumed_main.load(Ordering::Relaxed),
            LoopRole::Retry => self.consumed_retry.load(Ordering::Relaxed),
        }
    }

    /// Events inserted into the store.
    pub fn persisted_total(&self) -> u64 {
        self.persisted_total.load(Ordering::Relaxed)
    }

    /// Processing failures of one kind.
    pub fn failures(&self, kind: FailureKind) -> u64 {
        self.failure_counter(kind).load(Ordering::Relaxed)
    }

    /// Processing failures of every kind.
    pub fn failures_total(&self) -> u64 {
        [
            FailureKind::Decode,
            FailureKind::Envelope,
            FailureKind::Validation,
            FailureKind::Persistence,
        ]
        .iter()
        .map(|kind| self.failures(*kind))
        .sum()
    }

    /// Envelopes published to the retry topic.
    pub fn retry_published_total(&self) -> u64 {
        self.retry_published_total.load(Ordering::Relaxed)
    }

    /// Envelopes published to the dead-letter topic.
    pub fn dead_lettered_total(&self) -> u64 {
        self.dead_lettered_total.load(Ordering::Relaxed)
    }

    /// Envelopes that could not be published.
    pub fn routing_failures_total(&self) -> u64 {
        self.routing_failures_total.load(Ordering::Relaxed)
    }

    /// Envelopes written to the local spool.
    pub fn spooled_total(&self) -> u64 {
        self.spooled_total.load(Ordering::Relaxed)
    }

    /// Failed offset commits.
    pub fn commit_failures_total(&self) -> u64 {
        self.commit_failures_total.load(Ordering::Relaxed)
    }

    /// Poll errors.
    pub fn poll_errors_total(&self) -> u64 {
        self.poll_errors_total.load(Ordering::Relaxed)
    }

    /// Processing duration histogram data for Prometheus export.
    pub fn processing_duration_histogram(&self) -> DurationHistogram {
        let mut buckets = [(0.0, 0); 7];
        for (i, &bucket_ms) in PROCESSING_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.processing_duration_buckets[i].load(Ordering::Relaxed),
            );
        }

        DurationHistogram {
            sum_seconds: self.processing_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.processing_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.processing_duration_buckets[7].load(Ordering::Relaxed),
        }
    }

    fn failure_counter(&self, kind: FailureKind) -> &AtomicU64 {
        match kind {
            FailureKind::Decode => &self.failures_decode,
            FailureKind::Envelope => &self.failures_envelope,
            FailureKind::Validation => &self.failures_validation,
            FailureKind::Persistence => &self.failures_persistence,
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use evsink_core::metrics::PipelineMetrics;
    ///
    /// let metrics = PipelineMetrics::new();
    /// metrics.record_persisted();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("evsink_persisted_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix(DEFAULT_PREFIX)
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(4096);

        // === COUNTERS ===

        write_header(
            &mut output,
            prefix,
            "records_consumed_total",
            "Records pulled from Kafka by loop",
            "counter",
        );
        for role in [LoopRole::Main, LoopRole::Retry] {
            let _ = writeln!(
                output,
                "{}_records_consumed_total{{loop=\"{}\"}} {}",
                prefix,
                role.as_label(),
                self.consumed(role)
            );
        }
        output.push('\n');

        write_counter(
            &mut output,
            prefix,
            "persisted_total",
            "Events inserted into the store",
            self.persisted_total(),
        );

        write_header(
            &mut output,
            prefix,
            "processing_failures_total",
            "Processing failures by kind",
            "counter",
        );
        for kind in [
            FailureKind::Decode,
            FailureKind::Envelope,
            FailureKind::Validation,
            FailureKind::Persistence,
        ] {
            let _ = writeln!(
                output,
                "{}_processing_failures_total{{kind=\"{}\"}} {}",
                prefix,
                kind.as_label(),
                self.failures(kind)
            );
        }
        output.push('\n');

        write_counter(
            &mut output,
            prefix,
            "retry_published_total",
            "Envelopes published to the retry topic",
            self.retry_published_total(),
        );
        write_counter(
            &mut output,
            prefix,
            "dead_lettered_total",
            "Envelopes published to the dead-letter topic",
            self.dead_lettered_total(),
        );
        write_counter(
            &mut output,
            prefix,
            "routing_failures_total",
            "Envelopes that could not be published",
            self.routing_failures_total(),
        );
        write_counter(
            &mut output,
            prefix,
            "spooled_total",
            "Unpublishable envelopes written to the local spool",
            self.spooled_total(),
        );
        write_counter(
            &mut output,
            prefix,
            "commit_failures_total",
            "Offset commits that failed",
            self.commit_failures_total(),
        );
        write_counter(
            &mut output,
            prefix,
            "poll_errors_total",
            "Consumer poll errors",
            self.poll_errors_total(),
        );

        // === HISTOGRAM: processing_duration_seconds ===

        let hist = self.processing_duration_histogram();

        write_header(
            &mut output,
            prefix,
            "processing_duration_seconds",
            "Time from poll to persist or routing decision",
            "histogram",
        );
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                output,
                "{}_processing_duration_seconds_bucket{{le=\"{}\"}} {}",
                prefix, le, count
            );
        }
        let _ = writeln!(
            output,
            "{}_processing_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            prefix, hist.inf_bucket
        );
        let _ = writeln!(
            output,
            "{}_processing_duration_seconds_sum {}",
            prefix, hist.sum_seconds
        );
        let _ = writeln!(
            output,
            "{}_processing_duration_seconds_count {}",
            prefix, hist.count
        );

        output
    }
}

fn write_header(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str) {
    let _ = writeln!(output, "# HELP {}_{} {}", prefix, name, help);
    let _ = writeln!(output, "# TYPE {}_{} {}", prefix, name, kind);
}

fn write_counter(output: &mut String, prefix: &str, name: &str, help: &str, value: u64) {
    write_header(output, prefix, name, help, "counter");
    let _ = writeln!(output, "{}_{} {}", prefix, name, value);
    output.push('\n');
}

/// Duration histogram data for export.
#[derive(Debug, Clone)]
pub struct DurationHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary_seconds, count)
    pub buckets: [(f64, u64); 7],
    /// +Inf bucket count
    pub inf_bucket: u64,
}
