//! Reports feature flags that have not been evaluated for a long time.

use super::{list_active_environments, run_bounded, LastError};
use crate::config::{WatchersConfig, FEATURE_STALE_JOB};
use crate::core::{
    Environment, Feature, FeatureStaleNotification, Notification, NotificationEvent, Sender,
    SourceType,
};
use crate::scheduler::Job;
use crate::stores::{collect_all, EnvironmentStore, FeatureFilter, FeatureStore, LIST_PAGE_SIZE};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Whether `feature` has gone unused for longer than `threshold_seconds`.
///
/// Flags without usage information are never stale, and neither are disabled
/// flags with no off variation.
pub fn is_stale(feature: &Feature, now: DateTime<Utc>, threshold_seconds: i64) -> bool {
    if feature.is_disabled_and_off_variation_empty() {
        return false;
    }
    match feature.last_used_info {
        Some(info) => now.timestamp() - info.last_used_at > threshold_seconds,
        None => false,
    }
}

/// Sends one notification per environment listing its stale flags.
pub struct FeatureStaleWatcher {
    environments: Arc<dyn EnvironmentStore>,
    features: Arc<dyn FeatureStore>,
    sender: Arc<dyn Sender>,
    threshold_seconds: i64,
    timeout: Duration,
}

impl FeatureStaleWatcher {
    pub fn new(
        environments: Arc<dyn EnvironmentStore>,
        features: Arc<dyn FeatureStore>,
        sender: Arc<dyn Sender>,
        config: &WatchersConfig,
    ) -> Self {
        Self {
            environments,
            features,
            sender,
            threshold_seconds: config.stale_threshold_seconds,
            timeout: config.feature_stale.timeout(),
        }
    }

    /// Scans every active environment as of `now`.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let environments = list_active_environments(self.environments.as_ref(), None)
            .await
            .context("failed to list environments")?;
        let mut last_error = LastError::default();

        for environment in &environments {
            if let Err(e) = self.scan_environment(environment, now).await {
                error!(environment_id = %environment.id, error = ?e, "Stale feature scan failed");
                last_error.record(e);
            }
        }
        info!(environments = environments.len(), "Stale feature scan finished");
        last_error.into_result()
    }

    async fn scan_environment(
        &self,
        environment: &Environment,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let filter = FeatureFilter {
            archived: Some(false),
        };
        let features = collect_all(LIST_PAGE_SIZE, |request| {
            self.features.list_features(&environment.id, request, &filter)
        })
        .await
        .with_context(|| format!("failed to list features of {}", environment.id))?;

        let stale: Vec<Feature> = features
            .into_iter()
            .filter(|f| !f.archived && is_stale(f, now, self.threshold_seconds))
            .collect();
        if stale.is_empty() {
            debug!(environment_id = %environment.id, "No stale features");
            return Ok(());
        }

        debug!(environment_id = %environment.id, stale = stale.len(), "Sending stale features");
        let event = NotificationEvent::new(
            environment.id.clone(),
            SourceType::FeatureStale,
            Notification::FeatureStale(FeatureStaleNotification {
                environment_id: environment.id.clone(),
                environment_url_code: environment.url_code.clone(),
                features: stale,
            }),
            false,
        );
        self.sender
            .send(&event)
            .await
            .with_context(|| format!("failed to send stale features of {}", environment.id))
    }
}

#[async_trait]
impl Job for FeatureStaleWatcher {
    async fn run(&self, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        run_bounded(
            FEATURE_STALE_JOB,
            self.timeout,
            cancel,
            self.scan_at(Utc::now()),
        )
        .await
    }
}
