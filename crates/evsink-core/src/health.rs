//! Liveness and readiness state for the pipeline.
//!
//! Each consumption loop, the shared producer and the store report into one
//! [`HealthCheck`]. A component that has never reported is `Unknown` and does
//! not affect the overall status.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Main-topic consumption loop.
pub const COMPONENT_MAIN_LOOP: &str = "main-loop";
/// Retry-topic consumption loop.
pub const COMPONENT_RETRY_LOOP: &str = "retry-loop";
/// Shared producer used for retry and dead-letter sends.
pub const COMPONENT_PRODUCER: &str = "producer";
/// Event store.
pub const COMPONENT_STORE: &str = "store";

const PIPELINE_COMPONENTS: [&str; 4] = [
    COMPONENT_MAIN_LOOP,
    COMPONENT_RETRY_LOOP,
    COMPONENT_PRODUCER,
    COMPONENT_STORE,
];

/// Last reported state of one component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Working normally
    Healthy,
    /// Working, but the last operation failed
    Degraded(String),
    /// Not working
    Unhealthy(String),
    /// Never reported
    Unknown,
}

impl ComponentStatus {
    /// Lowercase name used in HTTP responses.
    pub fn label(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded(_) => "degraded",
            ComponentStatus::Unhealthy(_) => "unhealthy",
            ComponentStatus::Unknown => "unknown",
        }
    }

    /// Reason attached to a degraded or unhealthy status.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ComponentStatus::Degraded(reason) | ComponentStatus::Unhealthy(reason) => {
                Some(reason.as_str())
            }
            ComponentStatus::Healthy | ComponentStatus::Unknown => None,
        }
    }
}

/// Worst status across all components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Every reporting component is healthy
    Healthy,
    /// At least one component is degraded
    Degraded,
    /// At least one component is unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Lowercase name used in HTTP responses.
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Shared health registry.
pub struct HealthCheck {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    started_at: RwLock<Option<Instant>>,
}

impl HealthCheck {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(BTreeMap::new()),
            started_at: RwLock::new(None),
        }
    }

    /// Create a registry with every pipeline component registered as `Unknown`.
    pub fn for_pipeline() -> Self {
        let health = Self::new();
        for name in PIPELINE_COMPONENTS {
            health.register_component(name);
        }
        health
    }

    /// Track a component. It starts as `Unknown`.
    pub fn register_component(&self, name: &str) {
        self.set(name, ComponentStatus::Unknown);
    }

    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        let mut components = self.components.write();
        match components.get_mut(name) {
            Some(current) if *current == status => {}
            Some(current) => *current = status,
            None => {
                components.insert(name.to_string(), status);
            }
        }
    }

    /// Status of one component, if tracked.
    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// Every tracked component, sorted by name.
    pub fn get_all_statuses(&self) -> BTreeMap<String, ComponentStatus> {
        self.components.read().clone()
    }

    /// Worst status across the tracked components.
    pub fn overall_status(&self) -> HealthStatus {
        self.components
            .read()
            .values()
            .map(|status| match status {
                ComponentStatus::Unhealthy(_) => HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => HealthStatus::Degraded,
                ComponentStatus::Healthy | ComponentStatus::Unknown => HealthStatus::Healthy,
            })
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    /// Running and operational; what a readiness check should report.
    pub fn is_ready(&self) -> bool {
        self.is_running() && self.is_operational()
    }

    pub fn pipeline_started(&self) {
        *self.started_at.write() = Some(Instant::now());
    }

    pub fn pipeline_stopped(&self) {
        *self.started_at.write() = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.read().is_some()
    }

    /// Time since [`HealthCheck::pipeline_started`], while running.
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.read().map(|started| started.elapsed())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_components_start_unknown() {
        let health = HealthCheck::for_pipeline();

        let names: Vec<String> = health.get_all_statuses().into_keys().collect();
        assert_eq!(names, vec!["main-loop", "producer", "retry-loop", "store"]);
        assert!(health
            .get_all_statuses()
            .values()
            .all(|s| *s == ComponentStatus::Unknown));
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_worst_component_wins() {
        let health = HealthCheck::for_pipeline();
        for name in PIPELINE_COMPONENTS {
            health.mark_healthy(name);
        }
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_degraded(COMPONENT_STORE, "insert failed");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(COMPONENT_MAIN_LOOP, "stopped");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());

        health.mark_healthy(COMPONENT_MAIN_LOOP);
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
    }

    #[test]
    fn test_status_labels_and_reasons() {
        let degraded = ComponentStatus::Degraded("publish to user-events-dlq failed".into());
        assert_eq!(degraded.label(), "degraded");
        assert_eq!(degraded.reason(), Some("publish to user-events-dlq failed"));
        assert_eq!(ComponentStatus::Unknown.reason(), None);
        assert_eq!(HealthStatus::Unhealthy.label(), "unhealthy");
    }

    #[test]
    fn test_readiness_requires_running_pipeline() {
        let health = HealthCheck::for_pipeline();
        assert!(!health.is_ready());
        assert!(health.uptime().is_none());

        health.pipeline_started();
        assert!(health.is_ready());
        assert!(health.uptime().is_some());

        health.mark_unhealthy(COMPONENT_RETRY_LOOP, "poll failed");
        assert!(!health.is_ready());

        health.pipeline_stopped();
        assert!(!health.is_running());
    }
}
