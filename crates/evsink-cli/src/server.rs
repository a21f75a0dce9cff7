//! Health and metrics HTTP endpoints for a running pipeline.
//!
//! Health (`/health`, `/healthz`, `/readyz`) and Prometheus metrics
//! (`/metrics`) are served on separate ports so they can be exposed
//! independently.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use evsink_core::health::{HealthCheck, HealthStatus};
use evsink_core::metrics::PipelineMetrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Handles shared with the HTTP handlers.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Body of `/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    pub components: BTreeMap<String, ComponentBody>,
}

/// One component inside [`HealthResponse`].
#[derive(Debug, Serialize)]
pub struct ComponentBody {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    fn from_health(health: &HealthCheck) -> Self {
        let components = health
            .get_all_statuses()
            .into_iter()
            .map(|(name, status)| {
                let body = ComponentBody {
                    status: status.label(),
                    message: status.reason().map(str::to_string),
                };
                (name, body)
            })
            .collect();

        Self {
            status: health.overall_status().label(),
            uptime_seconds: health.uptime().map(|d| d.as_secs()),
            components,
        }
    }
}

fn health_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

fn metrics_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn bind(port: u16, name: &str) -> Option<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!(port = port, server = name, "HTTP server listening");
            Some(listener)
        }
        Err(e) => {
            error!(error = %e, port = port, server = name, "Failed to bind HTTP server");
            None
        }
    }
}

/// Serve health and metrics until the shutdown channel fires.
///
/// Bind failures are logged; the pipeline keeps running without endpoints.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let Some(health_listener) = bind(health_port, "health").await else {
        return;
    };
    let Some(metrics_listener) = bind(metrics_port, "metrics").await else {
        return;
    };

    let health = axum::serve(health_listener, health_router(Arc::clone(&state)));
    let metrics = axum::serve(metrics_listener, metrics_router(state));

    tokio::select! {
        result = health => {
            if let Err(e) = result {
                error!(error = %e, "Health server error");
            }
        }
        result = metrics => {
            if let Err(e) = result {
                error!(error = %e, "Metrics server error");
            }
        }
        _ = shutdown_rx.recv() => {
            info!("HTTP servers shutting down");
        }
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = HealthResponse::from_health(&state.health);
    let code = match state.health.overall_status() {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(response))
}

/// Liveness: the process is up and no component is unhealthy.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    if state.health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness: both loops have been started and nothing is unhealthy.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.export_prometheus_text(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use evsink_core::health::{COMPONENT_PRODUCER, COMPONENT_RETRY_LOOP};

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            health: Arc::new(HealthCheck::for_pipeline()),
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    #[test]
    fn test_health_response_body() {
        let health = HealthCheck::for_pipeline();
        health.mark_healthy(COMPONENT_RETRY_LOOP);
        health.mark_degraded(COMPONENT_PRODUCER, "publish to user-events-retry failed");

        let response = HealthResponse::from_health(&health);
        assert_eq!(response.status, "degraded");
        assert!(response.uptime_seconds.is_none());
        assert_eq!(response.components[COMPONENT_RETRY_LOOP].status, "healthy");
        assert_eq!(
            response.components[COMPONENT_PRODUCER].message.as_deref(),
            Some("publish to user-events-retry failed")
        );
        assert_eq!(response.components["store"].status, "unknown");
    }

    #[tokio::test]
    async fn test_health_handler_reports_unhealthy_loop() {
        let state = state();
        state.health.pipeline_started();
        state.health.mark_unhealthy(COMPONENT_RETRY_LOOP, "poll failed");

        let response = health_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            healthz_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_readiness_follows_pipeline_lifecycle() {
        let state = state();
        assert_eq!(
            readyz_handler(State(Arc::clone(&state))).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.health.pipeline_started();
        assert_eq!(readyz_handler(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_handler_serves_prometheus_text() {
        let state = state();
        state.metrics.record_persisted();

        let response = metrics_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );
    }
}
