//! Scheduled watchers that scan platform resources and synthesize
//! notification events.
//!
//! Every watcher walks the active environments, builds at most one event per
//! environment, and keeps going when one environment fails. The last failure
//! is returned once all environments have been processed.

use crate::core::{Environment, Project};
use crate::error::StoreError;
use crate::scheduler::cancelled;
use crate::stores::{collect_all, EnvironmentFilter, EnvironmentStore, LIST_PAGE_SIZE};
use anyhow::anyhow;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

pub mod experiment_running;
pub mod feature_stale;
pub mod mau_count;

pub use experiment_running::ExperimentRunningWatcher;
pub use feature_stale::{is_stale, FeatureStaleWatcher};
pub use mau_count::{last_year_month, year_month_key, MauCountWatcher};

/// Lists every non-archived environment, optionally of one project.
pub async fn list_active_environments(
    store: &dyn EnvironmentStore,
    project_id: Option<&str>,
) -> Result<Vec<Environment>, StoreError> {
    let filter = EnvironmentFilter {
        project_id: project_id.map(str::to_string),
        archived: Some(false),
    };
    collect_all(LIST_PAGE_SIZE, |request| {
        let filter = filter.clone();
        async move { store.list_environments(request, &filter).await }
    })
    .await
}

pub async fn list_projects(store: &dyn EnvironmentStore) -> Result<Vec<Project>, StoreError> {
    collect_all(LIST_PAGE_SIZE, |request| store.list_projects(request)).await
}

/// Remembers the most recent failure of a scan.
#[derive(Debug, Default)]
pub(crate) struct LastError {
    error: Option<anyhow::Error>,
    failures: usize,
}

impl LastError {
    pub(crate) fn record(&mut self, error: anyhow::Error) {
        self.failures += 1;
        self.error = Some(error);
    }

    pub(crate) fn into_result(self) -> anyhow::Result<()> {
        match self.error {
            Some(error) if self.failures > 1 => {
                Err(error.context(format!("{} environments failed", self.failures)))
            }
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Runs `scan` until it finishes, `timeout` elapses, or `cancel` fires.
pub(crate) async fn run_bounded<F>(
    job: &str,
    timeout: Duration,
    mut cancel: watch::Receiver<bool>,
    scan: F,
) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => Err(anyhow!("{job} was cancelled")),
        result = tokio::time::timeout(timeout, scan) => match result {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{job} timed out after {timeout:?}")),
        },
    }
}
