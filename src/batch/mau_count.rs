//! Reports each environment's monthly active users for the previous month.

use super::{list_active_environments, list_projects, run_bounded, LastError};
use crate::config::{WatchersConfig, MAU_COUNT_JOB};
use crate::core::{
    Environment, MauCountNotification, Notification, NotificationEvent, Sender, SourceType,
};
use crate::scheduler::Job;
use crate::stores::{EnvironmentStore, UsageStore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// The calendar month before the one containing `now` in `timezone`.
pub fn last_year_month(now: DateTime<Utc>, timezone: Tz) -> (i32, u32) {
    let local = now.with_timezone(&timezone);
    match local.month() {
        1 => (local.year() - 1, 12),
        month => (local.year(), month - 1),
    }
}

/// Formats a month as the `YYYYMM` key used by the usage store.
pub fn year_month_key(year: i32, month: u32) -> String {
    format!("{year:04}{month:02}")
}

/// Sends every environment's MAU aggregate of the previous month.
///
/// Unlike the other watchers an event is sent for every environment, even
/// when its counts are zero.
pub struct MauCountWatcher {
    environments: Arc<dyn EnvironmentStore>,
    usage: Arc<dyn UsageStore>,
    sender: Arc<dyn Sender>,
    timezone: Tz,
    timeout: Duration,
}

impl MauCountWatcher {
    pub fn new(
        environments: Arc<dyn EnvironmentStore>,
        usage: Arc<dyn UsageStore>,
        sender: Arc<dyn Sender>,
        config: &WatchersConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            environments,
            usage,
            sender,
            timezone: config.mau_reference_timezone()?,
            timeout: config.mau_count.timeout(),
        })
    }

    /// Scans every active environment of every enabled project, reporting
    /// the month before `now`.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let (year, month) = last_year_month(now, self.timezone);
        let projects = list_projects(self.environments.as_ref())
            .await
            .context("failed to list projects")?;
        let mut last_error = LastError::default();
        let mut scanned = 0;

        for project in projects.iter().filter(|p| !p.disabled) {
            let environments =
                match list_active_environments(self.environments.as_ref(), Some(&project.id))
                    .await
                {
                    Ok(environments) => environments,
                    Err(e) => {
                        error!(project_id = %project.id, error = %e, "Failed to list environments");
                        last_error.record(anyhow::Error::new(e).context(format!(
                            "failed to list environments of project {}",
                            project.id
                        )));
                        continue;
                    }
                };

            for environment in &environments {
                scanned += 1;
                if let Err(e) = self.report(environment, year, month).await {
                    error!(environment_id = %environment.id, error = ?e, "MAU report failed");
                    last_error.record(e);
                }
            }
        }
        info!(
            environments = scanned,
            month = %year_month_key(year, month),
            "MAU count scan finished"
        );
        last_error.into_result()
    }

    async fn report(&self, environment: &Environment, year: i32, month: u32) -> anyhow::Result<()> {
        let key = year_month_key(year, month);
        let count = self
            .usage
            .get_mau_count(&environment.id, &key)
            .await
            .with_context(|| format!("failed to get MAU count of {} for {key}", environment.id))?;
        debug!(
            environment_id = %environment.id,
            event_count = count.event_count,
            user_count = count.user_count,
            "Sending MAU count"
        );

        let event = NotificationEvent::new(
            environment.id.clone(),
            SourceType::MauCount,
            Notification::MauCount(MauCountNotification {
                environment_id: environment.id.clone(),
                environment_url_code: environment.url_code.clone(),
                event_count: count.event_count,
                user_count: count.user_count,
                year,
                month,
            }),
            false,
        );
        self.sender
            .send(&event)
            .await
            .with_context(|| format!("failed to send MAU count of {}", environment.id))
    }
}

#[async_trait]
impl Job for MauCountWatcher {
    async fn run(&self, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        run_bounded(MAU_COUNT_JOB, self.timeout, cancel, self.scan_at(Utc::now())).await
    }
}
