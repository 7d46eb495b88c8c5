//! Integration tests for the cron job scheduler.

#[path = "../helpers/mod.rs"]
mod helpers;

use async_trait::async_trait;
use flag_notifier::{
    config::Config,
    consumer::DomainEventConsumer,
    core::{EntityType, SourceType},
    internal_metrics::Metrics,
    notification::NotificationSender,
    pubsub::{memory::MemoryPuller, RateLimitedPuller},
    scheduler::{cancelled, Job, JobScheduler},
    stores::memory::{MemoryEnvironmentStore, MemorySubscriptionStore},
};
use helpers::{
    fixtures::{domain_event_json, environment, subscription},
    mock_notifier::RecordingNotifier,
    test_metrics::TestMetrics,
};
use serde_json::json;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const EVERY_SECOND: &str = "* * * * * *";

fn scheduler(stop_grace: Duration) -> JobScheduler {
    JobScheduler::new(chrono_tz::Asia::Tokyo, stop_grace, Metrics::new_for_test())
}

/// A job that runs for `duration` and tracks how many runs overlap.
struct SlowJob {
    duration: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowJob {
    fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Job for SlowJob {
    async fn run(&self, _cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A job that ignores cancellation entirely.
struct StuckJob;

#[async_trait]
impl Job for StuckJob {
    async fn run(&self, _cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// A job that returns as soon as it is cancelled.
struct CooperativeJob;

#[async_trait]
impl Job for CooperativeJob {
    async fn run(&self, mut cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        cancelled(&mut cancel).await;
        Ok(())
    }
}

#[tokio::test]
#[serial]
async fn test_runs_of_the_same_job_may_overlap() {
    let job = SlowJob::new(Duration::from_millis(2500));
    let mut scheduler = scheduler(Duration::from_secs(5));
    scheduler.add_job("slow", EVERY_SECOND, job.clone()).unwrap();
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    scheduler.stop().await;

    assert!(
        job.max_active.load(Ordering::SeqCst) >= 2,
        "a new run starts while the previous one is still going"
    );
}

#[tokio::test]
#[serial]
async fn test_stop_aborts_runs_after_the_grace_period() {
    let metrics = TestMetrics::global();
    let failed_key = "job_finished_total{job=stuck,code=fail}";
    let failed_before = metrics.get_counter(failed_key);

    let mut scheduler = scheduler(Duration::from_millis(200));
    scheduler.add_job("stuck", EVERY_SECOND, Arc::new(StuckJob)).unwrap();
    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
        .await
        .expect("stop did not honour the grace period");

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!scheduler.is_running());
    assert!(metrics.get_counter(failed_key) > failed_before);
}

#[tokio::test]
#[serial]
async fn test_cooperative_runs_finish_successfully_on_stop() {
    let metrics = TestMetrics::global();
    let success_key = "job_finished_total{job=cooperative,code=success}";
    let started_key = "job_started_total{job=cooperative}";
    let success_before = metrics.get_counter(success_key);
    let started_before = metrics.get_counter(started_key);

    let mut scheduler = scheduler(Duration::from_secs(30));
    scheduler
        .add_job("cooperative", EVERY_SECOND, Arc::new(CooperativeJob))
        .unwrap();
    scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stopped = Instant::now();
    scheduler.stop().await;

    assert!(stopped.elapsed() < Duration::from_secs(5));
    let started = metrics.get_counter(started_key) - started_before;
    assert!(started >= 1);
    assert_eq!(metrics.get_counter(success_key) - success_before, started);
}

#[tokio::test]
#[serial]
async fn test_scheduled_consumer_delivers_streamed_events() {
    let config = Config::default();
    let puller = Arc::new(MemoryPuller::new().keep_open());
    let environments = Arc::new(MemoryEnvironmentStore::new());
    environments.add_environment("env1", environment("ns1", "prod", "p1"));
    let subscriptions = Arc::new(MemorySubscriptionStore::new());
    subscriptions.add_subscription(subscription(
        "s1",
        "ns1",
        &[SourceType::DomainEventFeature],
        "https://hooks.example.com/s1",
    ));
    let notifier = RecordingNotifier::new();
    let sender = Arc::new(NotificationSender::new(
        subscriptions,
        vec![Arc::new(notifier.clone())],
        Metrics::new_for_test(),
    ));

    let mut consumer_config = config.consumer.clone();
    consumer_config.running_duration_per_batch_seconds = 1;
    let consumer = DomainEventConsumer::new(
        RateLimitedPuller::new(puller.clone(), &config.puller).unwrap(),
        environments,
        sender,
        Metrics::new_for_test(),
        &consumer_config,
    );

    let mut scheduler = scheduler(Duration::from_secs(5));
    scheduler
        .add_job("domain_event_consumer", EVERY_SECOND, Arc::new(consumer))
        .unwrap();
    scheduler.start().unwrap();

    let message_id = puller.push_with_id(
        "abc",
        domain_event_json(EntityType::Feature, "checkout", "env1", json!({})),
    );
    notifier.wait_for_count(1, Duration::from_secs(5)).await;
    scheduler.stop().await;

    assert_eq!(notifier.deliveries().len(), 1);
    assert_eq!(puller.acked(), vec![message_id]);
}
