//! # Internal Metrics Module
//!
//! This module provides the infrastructure for collecting and exposing the
//! dispatch pipeline's metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: The entry point for initializing the metrics system.
//!   It installs the Prometheus recorder, binds the metrics server, and
//!   constructs the `Metrics` handle.
//!
//! - **`Metrics`**: A lightweight, cloneable struct that serves as the public
//!   API for the rest of the application. It provides high-level methods for
//!   updating the predefined counters and histograms.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes `/metrics` for Prometheus and `/health` for liveness checks.

use crate::config::MetricsConfig;
use crate::health::HealthChecker;
use crate::internal_metrics::server::MetricsServer;
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

pub mod server;

/// Outcome label of a scheduled job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Fail,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Fail => "fail",
        }
    }
}

/// The public API for the metrics system.
///
/// Counters are resolved through the global recorder on every call, so a
/// handle created before the recorder is installed still reports correctly.
#[derive(Clone)]
pub struct Metrics {
    _private: (),
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!("received_messages_total", Unit::Count, "Total number of stream messages received by the domain event consumer, labeled by type.");
        metrics::describe_counter!("handled_messages_total", Unit::Count, "Total number of stream messages handled, labeled by type and classification code.");
        metrics::describe_counter!("sender_received_total", Unit::Count, "Total number of notification events submitted to the sender, labeled by type.");
        metrics::describe_counter!("sender_handled_total", Unit::Count, "Total number of notification events handled by the sender, labeled by type and code.");
        metrics::describe_counter!("notifications_delivered_total", Unit::Count, "Total number of notifier deliveries, labeled by notifier and outcome.");
        metrics::describe_counter!("job_started_total", Unit::Count, "Total number of scheduled job executions started, labeled by job.");
        metrics::describe_counter!("job_finished_total", Unit::Count, "Total number of scheduled job executions finished, labeled by job and code.");
        metrics::describe_histogram!("job_duration_seconds", Unit::Seconds, "Execution time of scheduled jobs, labeled by job and code.");
        metrics::describe_histogram!("message_handle_duration_seconds", Unit::Seconds, "Time spent handling a single stream message.");
        Self { _private: () }
    }

    /// Creates a `Metrics` instance suitable for testing.
    ///
    /// Without an installed recorder every update is a no-op.
    pub fn new_for_test() -> Self {
        Self::new()
    }

    pub fn increment_message_received(&self, kind: &'static str) {
        metrics::counter!("received_messages_total", "type" => kind).increment(1);
    }

    pub fn increment_message_handled(&self, kind: &'static str, code: &'static str) {
        metrics::counter!("handled_messages_total", "type" => kind, "code" => code).increment(1);
    }

    pub fn record_message_handle_duration(&self, duration: Duration) {
        metrics::histogram!("message_handle_duration_seconds").record(duration.as_secs_f64());
    }

    pub fn increment_sender_received(&self, kind: &'static str) {
        metrics::counter!("sender_received_total", "type" => kind).increment(1);
    }

    pub fn increment_sender_handled(&self, kind: &'static str, code: &'static str) {
        metrics::counter!("sender_handled_total", "type" => kind, "code" => code).increment(1);
    }

    pub fn increment_notification_delivered(&self, notifier: &str, outcome: &'static str) {
        metrics::counter!(
            "notifications_delivered_total",
            "notifier" => notifier.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn increment_job_started(&self, job: &str) {
        metrics::counter!("job_started_total", "job" => job.to_string()).increment(1);
    }

    pub fn record_job_finished(&self, job: &str, outcome: JobOutcome, duration: Duration) {
        metrics::counter!(
            "job_finished_total",
            "job" => job.to_string(),
            "code" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "job_duration_seconds",
            "job" => job.to_string(),
            "code" => outcome.as_str()
        )
        .record(duration.as_secs_f64());
    }
}

/// Builder for the metrics system.
///
/// This builder is responsible for initializing the `PrometheusRecorder`,
/// binding the `MetricsServer`, and creating the `Metrics` handle.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    /// Creates a new `MetricsBuilder` with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Initializes the metrics system and returns a `Metrics` handle and an
    /// optional `MetricsServer`.
    ///
    /// If metrics are disabled, or the recorder or listener cannot be set up,
    /// this returns a `Metrics` handle without a server.
    pub fn build(
        self,
        health: HealthChecker,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::new(), None);
        }

        let recorder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 3600.0],
        ) {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!(error = %e, "Failed to configure Prometheus buckets");
                return (Metrics::new(), None);
            }
        };
        let handle = recorder.handle();

        // Bind before installing the recorder so a bind failure leaves the
        // process without a half-configured exporter.
        let listener = match std::net::TcpListener::bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    address = %self.config.listen_address,
                    error = %e,
                    "Failed to bind metrics server"
                );
                return (Metrics::new(), None);
            }
        };
        let listener = match listener
            .set_nonblocking(true)
            .and_then(|_| TcpListener::from_std(listener))
        {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Failed to prepare metrics listener");
                return (Metrics::new(), None);
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!(error = %e, "Failed to get local address for metrics server");
                return (Metrics::new(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!(error = %e, "Failed to install Prometheus recorder");
            return (Metrics::new(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, health, shutdown_rx);
        (metrics, Some((server, addr)))
    }
}
