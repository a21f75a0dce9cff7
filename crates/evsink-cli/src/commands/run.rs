//! Run command implementation.

use crate::server::{start_server, ServerState};
use anyhow::{bail, Result};
use evsink_core::{Config, Pipeline};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Run the pipeline until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    info!(
        topic = %config.kafka.topic,
        group = %config.kafka.consumer_group,
        servers = %config.kafka.bootstrap_list(),
        "Starting ingestion pipeline"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;

    let pipeline = Pipeline::connect(&config).await?;
    let shutdown_tx = pipeline.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: pipeline.health(),
        metrics: pipeline.metrics(),
    });

    // Start HTTP servers
    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        shutdown_tx.subscribe(),
    ));

    tokio::spawn(forward_signals(shutdown_tx));

    let report = pipeline.run().await;

    for (client, error) in &report.shutdown.failed {
        warn!(client = %client, error = %error, "Client was not disconnected cleanly");
    }
    if report.main_loop.is_none() || report.retry_loop.is_none() {
        bail!("Consumption loops did not stop cleanly");
    }

    info!("Ingestion pipeline stopped");
    Ok(())
}

/// Send on the shutdown channel when SIGINT or SIGTERM arrives.
async fn forward_signals(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to install SIGTERM handler, only Ctrl+C will stop the pipeline"
                );
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                let _ = shutdown_tx.send(());
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}
