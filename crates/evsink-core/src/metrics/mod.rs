//! Pipeline metrics.

mod prometheus;

pub use prometheus::{DurationHistogram, PipelineMetrics};
