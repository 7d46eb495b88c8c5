//! # Metrics Server
//!
//! This module defines the `MetricsServer`, an `axum`-based web server that
//! exposes the collected metrics to a Prometheus scraper on `/metrics` and the
//! aggregated component health on `/health`.
//!
//! The server stops serving once the application's shutdown signal fires.

use crate::health::{HealthChecker, HealthStatus};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

#[derive(Clone)]
struct ServerState {
    prom_handle: PrometheusHandle,
    health: HealthChecker,
}

/// A server that exposes metrics and health to scrapers and health checks.
pub struct MetricsServer {
    listener: TcpListener,
    state: ServerState,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Creates a new `MetricsServer` but does not spawn it.
    ///
    /// # Arguments
    ///
    /// * `listener` - A `TcpListener` that has already been bound to an address.
    /// * `prom_handle` - A `PrometheusHandle` used to render the metrics.
    /// * `health` - The checks reported on `/health`.
    /// * `shutdown_rx` - A watch channel receiver for graceful shutdown.
    pub fn new(
        listener: TcpListener,
        prom_handle: PrometheusHandle,
        health: HealthChecker,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            state: ServerState {
                prom_handle,
                health,
            },
            shutdown_rx,
        }
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(mut self) -> impl Future<Output = ()> {
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .route("/health", get(render_health))
            .with_state(self.state);

        async move {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    trace!("Metrics server received shutdown signal.");
                }
                result = axum::serve(self.listener, app.into_make_service()) => {
                    if let Err(e) = result {
                        error!(error = %e, "Metrics server error");
                    }
                }
            }
            trace!("Metrics server task finished.");
        }
    }
}

async fn render_metrics(State(state): State<ServerState>) -> String {
    state.prom_handle.render()
}

async fn render_health(State(state): State<ServerState>) -> (StatusCode, Json<Value>) {
    let status = state.health.status();
    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(json!({
            "status": status,
            "checks": state.health.reports(),
        })),
    )
}
