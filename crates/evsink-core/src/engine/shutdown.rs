//! Ordered release of the pipeline's broker clients.

use crate::broker::ManagedClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Upper bound on a single client's disconnect.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to each client during shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Clients that disconnected cleanly, in order
    pub disconnected: Vec<String>,
    /// Clients whose disconnect failed, with the error
    pub failed: Vec<(String, String)>,
}

impl ShutdownReport {
    /// True if every client disconnected cleanly.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of clients a disconnect was attempted on.
    pub fn attempted(&self) -> usize {
        self.disconnected.len() + self.failed.len()
    }
}

/// Disconnects registered clients in registration order.
pub struct ShutdownCoordinator {
    clients: Vec<(String, Arc<dyn ManagedClient>)>,
    disconnect_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no clients.
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
        }
    }

    /// Override the per-client disconnect timeout.
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Add a client. Clients are disconnected in the order they were registered.
    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn ManagedClient>) {
        self.clients.push((name.into(), client));
    }

    /// Names of the registered clients, in disconnect order.
    pub fn client_names(&self) -> Vec<&str> {
        self.clients.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Disconnect every client. A failing or hung client is logged and does
    /// not prevent the remaining clients from being disconnected.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!(clients = self.clients.len(), "Disconnecting clients");

        let mut report = ShutdownReport::default();
        for (name, client) in &self.clients {
            match tokio::time::timeout(self.disconnect_timeout, client.disconnect()).await {
                Ok(Ok(())) => {
                    info!(client = %name, "Client disconnected");
                    report.disconnected.push(name.clone());
                }
                Ok(Err(e)) => {
                    error!(client = %name, error = %e, "Failed to disconnect client");
                    report.failed.push((name.clone(), e.to_string()));
                }
                Err(_) => {
                    error!(
                        client = %name,
                        timeout_secs = self.disconnect_timeout.as_secs(),
                        "Client disconnect timed out"
                    );
                    report
                        .failed
                        .push((name.clone(), "disconnect timed out".to_string()));
                }
            }
        }

        if report.is_clean() {
            info!("All clients disconnected");
        } else {
            error!(failed = report.failed.len(), "Shutdown completed with errors");
        }

        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, KafkaError, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct RecordingClient {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl ManagedClient for RecordingClient {
        async fn disconnect(&self) -> Result<()> {
            self.log.lock().push(self.name);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(Error::Kafka(KafkaError::Disconnect(format!(
                    "{} refused",
                    self.name
                ))));
            }
            Ok(())
        }
    }

    fn client(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
        hang: bool,
    ) -> Arc<dyn ManagedClient> {
        Arc::new(RecordingClient {
            name,
            log: Arc::clone(log),
            fail,
            hang,
        })
    }

    #[tokio::test]
    async fn test_disconnects_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register("main-consumer", client("main", &log, false, false));
        coordinator.register("retry-consumer", client("retry", &log, false, false));
        coordinator.register("producer", client("producer", &log, false, false));

        let report = coordinator.shutdown().await;

        assert!(report.is_clean());
        assert_eq!(*log.lock(), vec!["main", "retry", "producer"]);
        assert_eq!(
            report.disconnected,
            vec!["main-consumer", "retry-consumer", "producer"]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_clients() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register("main-consumer", client("main", &log, false, false));
        coordinator.register("retry-consumer", client("retry", &log, true, false));
        coordinator.register("producer", client("producer", &log, false, false));

        let report = coordinator.shutdown().await;

        assert_eq!(*log.lock(), vec!["main", "retry", "producer"]);
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "retry-consumer");
        assert!(report.failed[0].1.contains("retry refused"));
    }

    #[tokio::test]
    async fn test_hung_client_times_out() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator =
            ShutdownCoordinator::new().with_disconnect_timeout(Duration::from_millis(20));
        coordinator.register("main-consumer", client("main", &log, false, true));
        coordinator.register("producer", client("producer", &log, false, false));

        let report = coordinator.shutdown().await;

        assert_eq!(
            report.failed,
            vec![(
                "main-consumer".to_string(),
                "disconnect timed out".to_string()
            )]
        );
        assert_eq!(report.disconnected, vec!["producer"]);
    }
}
