//! Pipeline orchestration: consumption loops, shutdown and assembly.

mod backoff;
mod consumption;
mod pipeline;
mod shutdown;

pub use backoff::PollBackoff;
pub use consumption::{ConsumptionLoop, LoopRole, LoopStats, RecordOutcome, DEFAULT_POLL_TIMEOUT};
pub use pipeline::{Pipeline, PipelineReport, MAIN_CONSUMER, PRODUCER, RETRY_CONSUMER};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, DEFAULT_DISCONNECT_TIMEOUT};
