//! The main application logic, decoupled from the entry point.

use crate::{
    batch::{ExperimentRunningWatcher, FeatureStaleWatcher, MauCountWatcher},
    config::{
        Config, DOMAIN_EVENT_JOB, EXPERIMENT_RUNNING_JOB, FEATURE_STALE_JOB, MAU_COUNT_JOB,
    },
    consumer::DomainEventConsumer,
    core::{Notifier, Sender},
    health::HealthChecker,
    internal_metrics::{Metrics, MetricsBuilder},
    notification::{NotificationSender, SlackNotifier},
    pubsub::{Puller, RateLimitedPuller},
    scheduler::{cancelled, JobScheduler},
    stores::{EnvironmentStore, ExperimentStore, FeatureStore, SubscriptionStore, UsageStore},
    task_manager::TaskManager,
};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// The external collaborators the dispatcher is wired against.
#[derive(Clone)]
pub struct Ports {
    pub environments: Arc<dyn EnvironmentStore>,
    pub features: Arc<dyn FeatureStore>,
    pub experiments: Arc<dyn ExperimentStore>,
    pub usage: Arc<dyn UsageStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    /// The domain event topic subscription.
    pub puller: Arc<dyn Puller>,
}

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    scheduler: JobScheduler,
    health: HealthChecker,
    metrics_addr: Option<SocketAddr>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config, ports: Ports) -> AppBuilder {
        AppBuilder::new(config, ports)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Waits for the shutdown signal, stops the scheduler, and waits for all
    /// background tasks.
    pub async fn run(mut self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        cancelled(&mut shutdown_rx).await;
        info!("Shutdown signal received. Stopping scheduler...");

        self.scheduler.stop().await;
        self.task_manager.shutdown().await;

        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Notifiers and metrics can be overridden, which is how tests observe the
/// pipeline without network access.
pub struct AppBuilder {
    config: Config,
    ports: Ports,
    notifiers_override: Option<Vec<Arc<dyn Notifier>>>,
    metrics_override: Option<Metrics>,
}

impl AppBuilder {
    pub fn new(config: Config, ports: Ports) -> Self {
        Self {
            config,
            ports,
            notifiers_override: None,
            metrics_override: None,
        }
    }

    /// Replaces the default Slack notifier.
    pub fn notifiers_override(mut self, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        self.notifiers_override = Some(notifiers);
        self
    }

    /// Uses `metrics` and skips the Prometheus exporter and its server.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Wires every component, registers the jobs, and starts the scheduler.
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        config.validate()?;
        let ports = self.ports;
        let task_manager = TaskManager::new(shutdown_rx);

        // The handle resolves the global recorder on every update, so it can
        // be created before the exporter is installed below.
        let metrics = self.metrics_override.clone().unwrap_or_else(Metrics::new);

        let notifiers = match self.notifiers_override {
            Some(notifiers) => notifiers,
            None => {
                let slack = SlackNotifier::new(&config.web_url, config.slack.request_timeout())?;
                vec![Arc::new(slack) as Arc<dyn Notifier>]
            }
        };
        let sender: Arc<dyn Sender> = Arc::new(NotificationSender::new(
            ports.subscriptions.clone(),
            notifiers,
            metrics.clone(),
        ));

        let puller = RateLimitedPuller::new(ports.puller.clone(), &config.puller)?;
        let consumer = DomainEventConsumer::new(
            puller,
            ports.environments.clone(),
            sender.clone(),
            metrics.clone(),
            &config.consumer,
        );
        let consumer_health = consumer.health();
        let feature_stale = FeatureStaleWatcher::new(
            ports.environments.clone(),
            ports.features.clone(),
            sender.clone(),
            &config.watchers,
        );
        let experiment_running = ExperimentRunningWatcher::new(
            ports.environments.clone(),
            ports.experiments.clone(),
            sender.clone(),
            &config.watchers,
        );
        let mau_count = MauCountWatcher::new(
            ports.environments.clone(),
            ports.usage.clone(),
            sender,
            &config.watchers,
        )?;

        let mut scheduler = JobScheduler::new(
            config.scheduler.timezone()?,
            config.scheduler.stop_grace(),
            metrics,
        );
        scheduler.add_job(DOMAIN_EVENT_JOB, &config.consumer.schedule, Arc::new(consumer))?;
        scheduler.add_job(
            FEATURE_STALE_JOB,
            &config.watchers.feature_stale.schedule,
            Arc::new(feature_stale),
        )?;
        scheduler.add_job(
            EXPERIMENT_RUNNING_JOB,
            &config.watchers.experiment_running.schedule,
            Arc::new(experiment_running),
        )?;
        scheduler.add_job(
            MAU_COUNT_JOB,
            &config.watchers.mau_count.schedule,
            Arc::new(mau_count),
        )?;

        let health = HealthChecker::new()
            .with_check(Arc::new(scheduler.health()))
            .with_check(Arc::new(consumer_health));

        let metrics_addr = if self.metrics_override.is_none() {
            let (_, server) = MetricsBuilder::new(config.metrics.clone())
                .build(health.clone(), task_manager.get_shutdown_rx());
            server.map(|(server, addr)| {
                task_manager.spawn("MetricsServer", server.run());
                info!(address = %addr, "Metrics server listening");
                addr
            })
        } else {
            None
        };

        scheduler.start()?;
        info!("Flag notifier initialized successfully. Jobs are scheduled.");

        Ok(App {
            task_manager,
            scheduler,
            health,
            metrics_addr,
        })
    }
}
