//! Integration tests for subscription resolution and fan-out in the sender.

#[path = "../helpers/mod.rs"]
mod helpers;

use flag_notifier::{
    core::{
        DomainEventNotification, EntityType, MauCountNotification, Notification,
        NotificationEvent, Notifier, Sender, SourceType,
    },
    error::{SendError, StoreError},
    internal_metrics::Metrics,
    notification::NotificationSender,
    stores::memory::MemorySubscriptionStore,
};
use helpers::{
    fixtures::{editor, subscription, tagged_subscription},
    mock_notifier::{FailingNotifier, RecordingNotifier},
};
use std::sync::Arc;

fn feature_event(entity_data: &str) -> NotificationEvent {
    let notification = Notification::DomainEvent(DomainEventNotification {
        environment_id: "ns1".to_string(),
        environment_url_code: "prod".to_string(),
        editor: editor(),
        entity_type: EntityType::Feature,
        entity_id: "checkout".to_string(),
        event_type: "FEATURE_UPDATED".to_string(),
        entity_data: entity_data.to_string(),
    });
    NotificationEvent::new("ns1", SourceType::DomainEventFeature, notification, false)
}

fn mau_event(environment_id: &str) -> NotificationEvent {
    let notification = Notification::MauCount(MauCountNotification {
        environment_id: environment_id.to_string(),
        environment_url_code: "prod".to_string(),
        event_count: 10,
        user_count: 3,
        year: 2024,
        month: 5,
    });
    NotificationEvent::new(environment_id, SourceType::MauCount, notification, false)
}

fn sender(
    store: Arc<MemorySubscriptionStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
) -> NotificationSender {
    NotificationSender::new(store, notifiers, Metrics::new_for_test())
}

#[tokio::test]
async fn test_only_subscriptions_sharing_a_tag_are_notified() {
    let store = Arc::new(MemorySubscriptionStore::new());
    store.add_subscription(tagged_subscription(
        "s1",
        "ns1",
        "https://hooks.example.com/s1",
        &["ios", "production"],
    ));
    store.add_subscription(tagged_subscription(
        "s2",
        "ns1",
        "https://hooks.example.com/s2",
        &["android", "staging"],
    ));
    store.add_subscription(tagged_subscription(
        "s3",
        "ns1",
        "https://hooks.example.com/s3",
        &[],
    ));
    let notifier = RecordingNotifier::new();

    sender(store, vec![Arc::new(notifier.clone())])
        .send(&feature_event(r#"{"id":"checkout","tags":["ios","production","v2"]}"#))
        .await
        .unwrap();

    assert_eq!(
        notifier.webhooks(),
        vec![
            "https://hooks.example.com/s1".to_string(),
            "https://hooks.example.com/s3".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_undecodable_feature_snapshot_aborts_the_send() {
    let store = Arc::new(MemorySubscriptionStore::new());
    store.add_subscription(tagged_subscription(
        "s1",
        "ns1",
        "https://hooks.example.com/s1",
        &[],
    ));
    store.add_subscription(tagged_subscription(
        "s2",
        "ns1",
        "https://hooks.example.com/s2",
        &["ios"],
    ));
    store.add_subscription(tagged_subscription(
        "s3",
        "ns1",
        "https://hooks.example.com/s3",
        &[],
    ));
    let notifier = RecordingNotifier::new();

    let err = sender(store, vec![Arc::new(notifier.clone())])
        .send(&feature_event("not json"))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::DecodeEntity { .. }), "{err}");
    // Deliveries made before the failing subscription are not undone.
    assert_eq!(
        notifier.webhooks(),
        vec!["https://hooks.example.com/s1".to_string()]
    );
}

#[tokio::test]
async fn test_tags_are_ignored_for_other_source_types() {
    let store = Arc::new(MemorySubscriptionStore::new());
    let mut tagged = subscription(
        "s1",
        "ns1",
        &[SourceType::MauCount],
        "https://hooks.example.com/s1",
    );
    tagged.feature_flag_tags = vec!["ios".to_string()];
    store.add_subscription(tagged);
    let notifier = RecordingNotifier::new();

    sender(store, vec![Arc::new(notifier.clone())])
        .send(&mau_event("ns1"))
        .await
        .unwrap();

    assert_eq!(notifier.deliveries().len(), 1);
}

#[tokio::test]
async fn test_admin_events_use_the_admin_subscription_pool() {
    let store = Arc::new(MemorySubscriptionStore::new());
    store.add_subscription(subscription(
        "admin",
        "",
        &[SourceType::DomainEventAccount],
        "https://hooks.example.com/admin",
    ));
    store.add_subscription(subscription(
        "env",
        "ns1",
        &[SourceType::DomainEventAccount],
        "https://hooks.example.com/env",
    ));
    let notifier = RecordingNotifier::new();

    let notification = Notification::DomainEvent(DomainEventNotification {
        environment_id: String::new(),
        environment_url_code: String::new(),
        editor: editor(),
        entity_type: EntityType::Account,
        entity_id: "bob@example.com".to_string(),
        event_type: "ACCOUNT_CREATED".to_string(),
        entity_data: "{}".to_string(),
    });
    let event = NotificationEvent::new("", SourceType::DomainEventAccount, notification, true);
    sender(store, vec![Arc::new(notifier.clone())])
        .send(&event)
        .await
        .unwrap();

    assert_eq!(
        notifier.webhooks(),
        vec!["https://hooks.example.com/admin".to_string()]
    );
}

#[tokio::test]
async fn test_subscriptions_are_read_across_pages() {
    let store = Arc::new(MemorySubscriptionStore::new());
    for i in 0..501 {
        store.add_subscription(subscription(
            &format!("s{i}"),
            "ns1",
            &[SourceType::MauCount],
            &format!("https://hooks.example.com/{i}"),
        ));
    }
    let notifier = RecordingNotifier::new();

    sender(store.clone(), vec![Arc::new(notifier.clone())])
        .send(&mau_event("ns1"))
        .await
        .unwrap();

    assert_eq!(notifier.deliveries().len(), 501);
    assert_eq!(store.list_calls(), 2);
}

#[tokio::test]
async fn test_failed_subscription_does_not_stop_the_others() {
    let store = Arc::new(MemorySubscriptionStore::new());
    for id in ["s1", "s2", "s3"] {
        store.add_subscription(subscription(
            id,
            "ns1",
            &[SourceType::MauCount],
            &format!("https://hooks.example.com/{id}"),
        ));
    }
    let failing = FailingNotifier::failing_for(&[
        "https://hooks.example.com/s1",
        "https://hooks.example.com/s3",
    ]);

    let err = sender(store, vec![Arc::new(failing.clone())])
        .send(&mau_event("ns1"))
        .await
        .unwrap_err();

    assert_eq!(failing.calls().len(), 3);
    match err {
        SendError::Notify {
            subscription_id, ..
        } => assert_eq!(subscription_id, "s3", "the last error is returned"),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_notifier_chain_stops_at_the_first_failure() {
    let store = Arc::new(MemorySubscriptionStore::new());
    store.add_subscription(subscription(
        "s1",
        "ns1",
        &[SourceType::MauCount],
        "https://hooks.example.com/s1",
    ));
    let failing = FailingNotifier::failing_for(&["https://hooks.example.com/s1"]);
    let recording = RecordingNotifier::new();

    let result = sender(
        store,
        vec![Arc::new(failing.clone()), Arc::new(recording.clone())],
    )
    .send(&mau_event("ns1"))
    .await;

    assert!(result.is_err());
    assert_eq!(failing.calls().len(), 1);
    assert!(recording.deliveries().is_empty());
}

#[tokio::test]
async fn test_subscription_listing_failure_is_returned() {
    let store = Arc::new(MemorySubscriptionStore::new());
    store.fail_lists_with(StoreError::Unavailable("connection reset".to_string()));
    let notifier = RecordingNotifier::new();

    let err = sender(store, vec![Arc::new(notifier.clone())])
        .send(&mau_event("ns1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::ListSubscriptions(StoreError::Unavailable(_))));
    assert!(notifier.deliveries().is_empty());
}

#[tokio::test]
async fn test_no_subscriptions_is_a_success() {
    let store = Arc::new(MemorySubscriptionStore::new());
    let notifier = RecordingNotifier::new();

    sender(store, vec![Arc::new(notifier.clone())])
        .send(&mau_event("ns9"))
        .await
        .unwrap();

    assert!(notifier.deliveries().is_empty());
}

#[tokio::test]
async fn test_event_whose_source_type_does_not_match_its_notification_is_rejected() {
    let store = Arc::new(MemorySubscriptionStore::new());
    store.add_subscription(subscription(
        "s1",
        "ns1",
        &[SourceType::FeatureStale],
        "https://hooks.example.com/s1",
    ));
    let notifier = RecordingNotifier::new();

    let mut event = mau_event("ns1");
    event.source_type = SourceType::FeatureStale;
    let err = sender(store.clone(), vec![Arc::new(notifier.clone())])
        .send(&event)
        .await
        .unwrap_err();

    match err {
        SendError::SourceTypeMismatch {
            source_type, kind, ..
        } => {
            assert_eq!(source_type, SourceType::FeatureStale);
            assert_eq!(kind, "mau_count");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(store.list_calls(), 0);
    assert!(notifier.deliveries().is_empty());
}
