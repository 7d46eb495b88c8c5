//! Reminds subscribers of experiments that are still running.

use super::{list_active_environments, run_bounded, LastError};
use crate::config::{WatchersConfig, EXPERIMENT_RUNNING_JOB};
use crate::core::{
    Environment, ExperimentRunningNotification, ExperimentStatus, Notification,
    NotificationEvent, Sender, SourceType,
};
use crate::scheduler::Job;
use crate::stores::{
    collect_all, EnvironmentStore, ExperimentFilter, ExperimentStore, LIST_PAGE_SIZE,
};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Sends one notification per environment listing its running experiments.
pub struct ExperimentRunningWatcher {
    environments: Arc<dyn EnvironmentStore>,
    experiments: Arc<dyn ExperimentStore>,
    sender: Arc<dyn Sender>,
    timeout: Duration,
}

impl ExperimentRunningWatcher {
    pub fn new(
        environments: Arc<dyn EnvironmentStore>,
        experiments: Arc<dyn ExperimentStore>,
        sender: Arc<dyn Sender>,
        config: &WatchersConfig,
    ) -> Self {
        Self {
            environments,
            experiments,
            sender,
            timeout: config.experiment_running.timeout(),
        }
    }

    pub async fn scan(&self) -> anyhow::Result<()> {
        let environments = list_active_environments(self.environments.as_ref(), None)
            .await
            .context("failed to list environments")?;
        let mut last_error = LastError::default();

        for environment in &environments {
            if let Err(e) = self.scan_environment(environment).await {
                error!(environment_id = %environment.id, error = ?e, "Running experiment scan failed");
                last_error.record(e);
            }
        }
        info!(environments = environments.len(), "Running experiment scan finished");
        last_error.into_result()
    }

    async fn scan_environment(&self, environment: &Environment) -> anyhow::Result<()> {
        let filter = ExperimentFilter {
            statuses: vec![ExperimentStatus::Running],
            archived: Some(false),
        };
        let experiments = collect_all(LIST_PAGE_SIZE, |request| {
            self.experiments
                .list_experiments(&environment.id, request, &filter)
        })
        .await
        .with_context(|| format!("failed to list experiments of {}", environment.id))?;

        if experiments.is_empty() {
            debug!(environment_id = %environment.id, "No running experiments");
            return Ok(());
        }

        let event = NotificationEvent::new(
            environment.id.clone(),
            SourceType::ExperimentRunning,
            Notification::ExperimentRunning(ExperimentRunningNotification {
                environment_id: environment.id.clone(),
                environment_url_code: environment.url_code.clone(),
                experiments,
            }),
            false,
        );
        self.sender
            .send(&event)
            .await
            .with_context(|| format!("failed to send running experiments of {}", environment.id))
    }
}

#[async_trait]
impl Job for ExperimentRunningWatcher {
    async fn run(&self, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        run_bounded(EXPERIMENT_RUNNING_JOB, self.timeout, cancel, self.scan()).await
    }
}
