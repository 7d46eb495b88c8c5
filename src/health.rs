//! Liveness reporting for the long-running components.
//!
//! Components expose a `HealthCheck`; the `HealthChecker` aggregates them for
//! the `/health` endpoint of the metrics server.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// A component that can report its own health.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self) -> HealthStatus;
}

/// A health flag shared between a component and its check.
#[derive(Debug, Clone)]
pub struct HealthFlag {
    name: String,
    healthy: Arc<AtomicBool>,
}

impl HealthFlag {
    /// Creates a flag that starts out healthy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl HealthCheck for HealthFlag {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> HealthStatus {
        if self.healthy.load(Ordering::SeqCst) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Result of a single named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub name: String,
    pub status: HealthStatus,
}

/// Aggregates the health of all registered components.
#[derive(Clone, Default)]
pub struct HealthChecker {
    checks: Vec<Arc<dyn HealthCheck>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn reports(&self) -> Vec<CheckReport> {
        self.checks
            .iter()
            .map(|c| CheckReport {
                name: c.name().to_string(),
                status: c.check(),
            })
            .collect()
    }

    /// Healthy only if every registered check is healthy.
    pub fn status(&self) -> HealthStatus {
        if self
            .checks
            .iter()
            .all(|c| c.check() == HealthStatus::Healthy)
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}
