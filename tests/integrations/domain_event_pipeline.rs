//! End-to-end tests from a domain event on the stream to a notifier call.

#[path = "../helpers/mod.rs"]
mod helpers;

use flag_notifier::{
    config::Config,
    consumer::DomainEventConsumer,
    core::{EntityType, Notification, Notifier, SourceType},
    error::StoreError,
    internal_metrics::Metrics,
    notification::NotificationSender,
    pubsub::{memory::MemoryPuller, RateLimitedPuller},
    stores::memory::{MemoryEnvironmentStore, MemorySubscriptionStore},
};
use helpers::{
    fixtures::{domain_event_json, environment, subscription, tagged_subscription},
    mock_notifier::{FailingNotifier, RecordingNotifier},
    test_metrics::TestMetrics,
};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use tokio::sync::watch;

struct Pipeline {
    puller: Arc<MemoryPuller>,
    environments: Arc<MemoryEnvironmentStore>,
    subscriptions: Arc<MemorySubscriptionStore>,
    consumer: DomainEventConsumer,
}

fn pipeline(notifier: Arc<dyn Notifier>) -> Pipeline {
    let config = Config::default();
    let puller = Arc::new(MemoryPuller::new());
    let environments = Arc::new(MemoryEnvironmentStore::new());
    environments.add_environment("env1", environment("ns1", "prod", "p1"));
    let subscriptions = Arc::new(MemorySubscriptionStore::new());

    let sender = Arc::new(NotificationSender::new(
        subscriptions.clone(),
        vec![notifier],
        Metrics::new_for_test(),
    ));
    let limited = RateLimitedPuller::new(puller.clone(), &config.puller).unwrap();
    let consumer = DomainEventConsumer::new(
        limited,
        environments.clone(),
        sender,
        Metrics::new_for_test(),
        &config.consumer,
    );
    Pipeline {
        puller,
        environments,
        subscriptions,
        consumer,
    }
}

/// A cancellation signal that never fires.
fn not_cancelled() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
#[serial]
async fn test_feature_event_reaches_subscribed_channel() {
    let notifier = RecordingNotifier::new();
    let p = pipeline(Arc::new(notifier.clone()));
    p.subscriptions.add_subscription(subscription(
        "s1",
        "ns1",
        &[SourceType::DomainEventFeature],
        "https://hooks.example.com/s1",
    ));
    let message_id = p.puller.push_with_id(
        "abc",
        domain_event_json(EntityType::Feature, "checkout", "env1", json!({"tags": []})),
    );

    let summary = p.consumer.consume(not_cancelled()).await;

    assert_eq!(summary.ok, 1);
    assert_eq!(p.puller.acked(), vec![message_id]);
    assert!(p.puller.nacked().is_empty());

    let deliveries = notifier.deliveries();
    assert_eq!(deliveries.len(), 1);
    match &deliveries[0].notification {
        Notification::DomainEvent(n) => {
            assert_eq!(n.environment_id, "ns1");
            assert_eq!(n.environment_url_code, "prod");
            assert_eq!(n.entity_id, "checkout");
            assert_eq!(n.editor.email, "alice@example.com");
        }
        other => panic!("unexpected notification {other:?}"),
    }
    assert_eq!(deliveries[0].language, "en");
}

#[tokio::test]
#[serial]
async fn test_tag_filtering_applies_to_streamed_feature_events() {
    let notifier = RecordingNotifier::new();
    let p = pipeline(Arc::new(notifier.clone()));
    for (id, tags) in [("s1", vec!["ios"]), ("s2", vec!["android"]), ("s3", vec![])] {
        let webhook = format!("https://hooks.example.com/{id}");
        p.subscriptions
            .add_subscription(tagged_subscription(id, "ns1", &webhook, &tags));
    }
    p.puller.push_with_id(
        "abc",
        domain_event_json(
            EntityType::Feature,
            "checkout",
            "env1",
            json!({"id": "checkout", "tags": ["ios", "production"]}),
        ),
    );

    let summary = p.consumer.consume(not_cancelled()).await;

    assert_eq!(summary.ok, 1);
    assert_eq!(
        notifier.webhooks(),
        vec![
            "https://hooks.example.com/s1".to_string(),
            "https://hooks.example.com/s3".to_string(),
        ]
    );
}

#[tokio::test]
#[serial]
async fn test_batch_with_mixed_outcomes_settles_every_message() {
    let notifier = FailingNotifier::failing_for(&["https://hooks.example.com/broken"]);
    let p = pipeline(Arc::new(notifier.clone()));
    p.environments
        .add_environment("env2", environment("ns2", "stg", "p1"));
    p.subscriptions.add_subscription(subscription(
        "s1",
        "ns1",
        &[SourceType::DomainEventGoal],
        "https://hooks.example.com/ok",
    ));
    p.subscriptions.add_subscription(subscription(
        "s2",
        "ns2",
        &[SourceType::DomainEventGoal],
        "https://hooks.example.com/broken",
    ));

    let delivered = p
        .puller
        .push_with_id("e1", domain_event_json(EntityType::Goal, "g1", "env1", json!({})));
    let undecodable = p.puller.push_with_id("e2", b"{not json".to_vec());
    let unknown_env = p
        .puller
        .push_with_id("e3", domain_event_json(EntityType::Goal, "g3", "gone", json!({})));
    let failed_send = p
        .puller
        .push_with_id("e4", domain_event_json(EntityType::Goal, "g4", "env2", json!({})));

    let summary = p.consumer.consume(not_cancelled()).await;

    assert_eq!(summary.ok, 1);
    assert_eq!(summary.bad_message, 2);
    assert_eq!(summary.non_repeatable_error, 1);
    assert_eq!(summary.total(), 4);

    // None of these can succeed on redelivery, so all are acknowledged.
    let mut acked = p.puller.acked();
    acked.sort();
    let mut expected = vec![delivered, undecodable, unknown_env, failed_send];
    expected.sort();
    assert_eq!(acked, expected);
    assert!(p.puller.nacked().is_empty());
    assert_eq!(
        notifier.calls(),
        vec![
            "https://hooks.example.com/ok".to_string(),
            "https://hooks.example.com/broken".to_string(),
        ]
    );
}

#[tokio::test]
#[serial]
async fn test_unavailable_environment_store_requests_redelivery() {
    let notifier = RecordingNotifier::new();
    let p = pipeline(Arc::new(notifier.clone()));
    p.environments
        .fail_lookups_with(StoreError::Unavailable("connection refused".to_string()));
    let message_id = p
        .puller
        .push_with_id("abc", domain_event_json(EntityType::Feature, "f1", "env1", json!({})));

    let summary = p.consumer.consume(not_cancelled()).await;

    assert_eq!(summary.repeatable_error, 1);
    assert_eq!(p.puller.nacked(), vec![message_id]);
    assert!(p.puller.acked().is_empty());
    assert!(notifier.deliveries().is_empty());
}

#[tokio::test]
#[serial]
async fn test_handled_messages_are_counted_by_code() {
    let metrics = TestMetrics::global();
    let ok_key = "handled_messages_total{type=domain_event,code=ok}";
    let bad_key = "handled_messages_total{type=domain_event,code=bad_message}";
    let ok_before = metrics.get_counter(ok_key);
    let bad_before = metrics.get_counter(bad_key);

    let p = pipeline(Arc::new(RecordingNotifier::new()));
    p.puller
        .push_with_id("abc", domain_event_json(EntityType::Feature, "f1", "env1", json!({})));
    p.puller.push(Default::default(), b"{}".to_vec());

    p.consumer.consume(not_cancelled()).await;

    assert_eq!(metrics.get_counter(ok_key) - ok_before, 1);
    assert_eq!(metrics.get_counter(bad_key) - bad_before, 1);
}
