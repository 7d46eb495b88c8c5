//! Integration tests for the scheduled batch watchers.

#[path = "../helpers/mod.rs"]
mod helpers;

use chrono::{TimeZone, Utc};
use flag_notifier::{
    batch::{ExperimentRunningWatcher, FeatureStaleWatcher, MauCountWatcher},
    config::Config,
    core::{Experiment, ExperimentStatus, MauCount, Notification, SourceType},
    error::StoreError,
    scheduler::Job,
    stores::memory::{
        MemoryEnvironmentStore, MemoryExperimentStore, MemoryFeatureStore, MemoryUsageStore,
    },
};
use helpers::{
    fixtures::{environment, feature, project},
    mock_sender::RecordingSender,
};
use std::sync::Arc;
use tokio::sync::watch;

const DAY: i64 = 24 * 60 * 60;

fn environments() -> Arc<MemoryEnvironmentStore> {
    let store = Arc::new(MemoryEnvironmentStore::new());
    store.add_project(project("p1"));
    store.add_environment("env1", environment("ns1", "prod", "p1"));
    store.add_environment("env2", environment("ns2", "stg", "p1"));
    store
}

fn experiment(id: &str, status: ExperimentStatus) -> Experiment {
    Experiment {
        id: id.to_string(),
        name: format!("{id} experiment"),
        feature_id: "f1".to_string(),
        status,
        start_at: 1_700_000_000,
        stop_at: 1_700_000_000 + 14 * DAY,
    }
}

#[tokio::test]
async fn test_stale_features_are_grouped_per_environment() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap();
    let config = Config::default();
    let features = Arc::new(MemoryFeatureStore::new());
    features.add_feature("ns1", feature("old", Some(now.timestamp() - 100 * DAY)));
    features.add_feature("ns1", feature("older", Some(now.timestamp() - 400 * DAY)));
    features.add_feature("ns1", feature("fresh", Some(now.timestamp() - DAY)));
    features.add_feature("ns1", feature("never_used", None));
    features.add_feature("ns2", feature("fresh", Some(now.timestamp() - DAY)));
    let sender = RecordingSender::new();

    let watcher = FeatureStaleWatcher::new(
        environments(),
        features,
        Arc::new(sender.clone()),
        &config.watchers,
    );
    watcher.scan_at(now).await.unwrap();

    let events = sender.events();
    assert_eq!(events.len(), 1, "only ns1 has stale features");
    assert_eq!(events[0].environment_id, "ns1");
    assert_eq!(events[0].source_type, SourceType::FeatureStale);
    assert!(!events[0].is_admin_event);
    match &events[0].notification {
        Notification::FeatureStale(n) => {
            let ids: Vec<&str> = n.features.iter().map(|f| f.id.as_str()).collect();
            assert_eq!(ids, ["old", "older"]);
            assert_eq!(n.environment_url_code, "prod");
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn test_stale_scan_continues_past_a_failing_environment() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap();
    let config = Config::default();
    let features = Arc::new(MemoryFeatureStore::new());
    features.fail_environment_with("ns1", StoreError::Unavailable("timeout".to_string()));
    features.add_feature("ns2", feature("old", Some(now.timestamp() - 100 * DAY)));
    let sender = RecordingSender::new();

    let watcher = FeatureStaleWatcher::new(
        environments(),
        features,
        Arc::new(sender.clone()),
        &config.watchers,
    );
    let err = watcher.scan_at(now).await.unwrap_err();

    assert!(format!("{err:#}").contains("ns1"), "{err:#}");
    let events = sender.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].environment_id, "ns2");
}

#[tokio::test]
async fn test_environment_listing_failure_aborts_the_scan() {
    let config = Config::default();
    let envs = environments();
    envs.fail_lists_with(StoreError::Internal("boom".to_string()));
    let sender = RecordingSender::new();

    let watcher = ExperimentRunningWatcher::new(
        envs,
        Arc::new(MemoryExperimentStore::new()),
        Arc::new(sender.clone()),
        &config.watchers,
    );

    assert!(watcher.scan().await.is_err());
    assert!(sender.events().is_empty());
}

#[tokio::test]
async fn test_running_experiments_are_reported() {
    let config = Config::default();
    let experiments = Arc::new(MemoryExperimentStore::new());
    experiments.add_experiment("ns1", experiment("e1", ExperimentStatus::Running));
    experiments.add_experiment("ns1", experiment("e2", ExperimentStatus::Stopped));
    experiments.add_experiment("ns2", experiment("e3", ExperimentStatus::Waiting));
    let sender = RecordingSender::new();

    let watcher = ExperimentRunningWatcher::new(
        environments(),
        experiments,
        Arc::new(sender.clone()),
        &config.watchers,
    );
    watcher.scan().await.unwrap();

    let events = sender.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source_type, SourceType::ExperimentRunning);
    match &events[0].notification {
        Notification::ExperimentRunning(n) => {
            assert_eq!(n.environment_id, "ns1");
            assert_eq!(n.experiments.len(), 1);
            assert_eq!(n.experiments[0].id, "e1");
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn test_mau_counts_report_the_previous_month_for_every_environment() {
    // 2023-01-01 00:30 in Tokyo is still December 31st in UTC.
    let now = Utc.with_ymd_and_hms(2022, 12, 31, 15, 30, 0).unwrap();
    let config = Config::default();
    let envs = environments();
    let mut disabled = project("p2");
    disabled.disabled = true;
    envs.add_project(disabled);
    envs.add_environment("env3", environment("ns3", "old", "p2"));

    let usage = Arc::new(MemoryUsageStore::new());
    usage.set_count(
        "ns1",
        "202212",
        MauCount {
            event_count: 1200,
            user_count: 34,
        },
    );
    let sender = RecordingSender::new();

    let watcher = MauCountWatcher::new(
        envs,
        usage.clone(),
        Arc::new(sender.clone()),
        &config.watchers,
    )
    .unwrap();
    watcher.scan_at(now).await.unwrap();

    assert_eq!(
        usage.requests(),
        vec![
            ("ns1".to_string(), "202212".to_string()),
            ("ns2".to_string(), "202212".to_string()),
        ]
    );
    let events = sender.events();
    assert_eq!(events.len(), 2, "zero counts are reported too");
    let counts: Vec<(String, i64, i64, i32, u32)> = events
        .iter()
        .map(|e| match &e.notification {
            Notification::MauCount(n) => (
                n.environment_id.clone(),
                n.event_count,
                n.user_count,
                n.year,
                n.month,
            ),
            other => panic!("unexpected notification {other:?}"),
        })
        .collect();
    assert_eq!(
        counts,
        vec![
            ("ns1".to_string(), 1200, 34, 2022, 12),
            ("ns2".to_string(), 0, 0, 2022, 12),
        ]
    );
}

#[tokio::test]
async fn test_send_failures_are_reported_after_the_full_scan() {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
    let config = Config::default();
    let sender = RecordingSender::new();
    sender.fail_for_environment("ns1");

    let watcher = MauCountWatcher::new(
        environments(),
        Arc::new(MemoryUsageStore::new()),
        Arc::new(sender.clone()),
        &config.watchers,
    )
    .unwrap();
    let err = watcher.scan_at(now).await.unwrap_err();

    assert!(format!("{err:#}").contains("ns1"), "{err:#}");
    assert_eq!(sender.events().len(), 2);
}

#[tokio::test]
async fn test_cancelled_watcher_job_reports_cancellation() {
    let config = Config::default();
    let sender = RecordingSender::new();
    let watcher = ExperimentRunningWatcher::new(
        environments(),
        Arc::new(MemoryExperimentStore::new()),
        Arc::new(sender.clone()),
        &config.watchers,
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();
    let err = watcher.run(cancel_rx).await.unwrap_err();

    assert!(err.to_string().contains("cancelled"), "{err}");
    assert!(sender.events().is_empty());
}
