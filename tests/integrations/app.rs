#[path = "../helpers/mod.rs"]
mod helpers;

use flag_notifier::{
    app::{App, Ports},
    config::Config,
    core::{EntityType, Notifier, SourceType},
    health::HealthStatus,
    internal_metrics::Metrics,
    pubsub::memory::MemoryPuller,
    stores::memory::{
        MemoryEnvironmentStore, MemoryExperimentStore, MemoryFeatureStore,
        MemorySubscriptionStore, MemoryUsageStore,
    },
};
use helpers::{
    fixtures::{domain_event_json, environment, subscription},
    mock_notifier::RecordingNotifier,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct TestPorts {
    puller: Arc<MemoryPuller>,
    ports: Ports,
}

fn test_ports() -> TestPorts {
    let environments = Arc::new(MemoryEnvironmentStore::new());
    environments.add_environment("env1", environment("ns1", "prod", "p1"));
    let subscriptions = Arc::new(MemorySubscriptionStore::new());
    subscriptions.add_subscription(subscription(
        "s1",
        "ns1",
        &[SourceType::DomainEventFeature],
        "https://hooks.example.com/s1",
    ));
    let puller = Arc::new(MemoryPuller::new().keep_open());

    TestPorts {
        puller: puller.clone(),
        ports: Ports {
            environments,
            features: Arc::new(MemoryFeatureStore::new()),
            experiments: Arc::new(MemoryExperimentStore::new()),
            usage: Arc::new(MemoryUsageStore::new()),
            subscriptions,
            puller,
        },
    }
}

/// A configuration that starts a one-second consumer run every second.
fn fast_config() -> Config {
    let mut config = Config::default();
    config.metrics.enabled = false;
    config.consumer.schedule = "* * * * * *".to_string();
    config.consumer.running_duration_per_batch_seconds = 1;
    config.scheduler.stop_grace_seconds = 5;
    config
}

#[tokio::test]
async fn test_app_delivers_events_and_shuts_down() {
    let TestPorts { puller, ports } = test_ports();
    let notifier = RecordingNotifier::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = App::builder(fast_config(), ports)
        .notifiers_override(vec![Arc::new(notifier.clone()) as Arc<dyn Notifier>])
        .metrics_override(Metrics::new_for_test())
        .build(shutdown_rx)
        .await
        .unwrap();
    assert!(app.is_running());
    assert!(app.metrics_addr().is_none());
    assert_eq!(app.health().status(), HealthStatus::Healthy);

    let app_handle = tokio::spawn(app.run());

    let message_id = puller.push_with_id(
        "abc",
        domain_event_json(EntityType::Feature, "checkout", "env1", json!({})),
    );
    notifier.wait_for_count(1, Duration::from_secs(10)).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), app_handle)
        .await
        .expect("app did not shut down")
        .unwrap()
        .unwrap();

    assert_eq!(puller.acked(), vec![message_id]);
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let TestPorts { ports, .. } = test_ports();
    let mut config = fast_config();
    config.watchers.feature_stale.schedule = "not a cron".to_string();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = App::builder(config, ports)
        .notifiers_override(Vec::new())
        .metrics_override(Metrics::new_for_test())
        .build(shutdown_rx)
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_metrics_server_reports_health() {
    let TestPorts { ports, .. } = test_ports();
    let mut config = fast_config();
    config.metrics.enabled = true;
    config.metrics.listen_address = SocketAddr::from(([127, 0, 0, 1], 0));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = App::builder(config, ports)
        .notifiers_override(vec![Arc::new(RecordingNotifier::new()) as Arc<dyn Notifier>])
        .build(shutdown_rx)
        .await
        .unwrap();
    let addr = app.metrics_addr().expect("metrics server was not started");
    let app_handle = tokio::spawn(app.run());

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    let names: Vec<&str> = body["checks"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(names, ["scheduler", "domain_event_puller"]);

    let metrics = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(metrics.status(), reqwest::StatusCode::OK);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), app_handle)
        .await
        .expect("app did not shut down")
        .unwrap()
        .unwrap();
}
