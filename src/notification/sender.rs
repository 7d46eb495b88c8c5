//! Resolves the subscriptions interested in an event and fans it out to the
//! notifiers.

use crate::core::{
    Notification, NotificationEvent, Notifier, Sender, SourceType, Subscription,
};
use crate::error::{SendError, StoreError};
use crate::internal_metrics::Metrics;
use crate::stores::{collect_all, SubscriptionStore, LIST_PAGE_SIZE};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Whether two tag sets share at least one tag.
///
/// False when either set is empty.
pub fn contains_tags(a: &[String], b: &[String]) -> bool {
    a.iter().any(|tag| b.contains(tag))
}

/// The part of a feature snapshot tag filtering looks at.
#[derive(Debug, Deserialize)]
struct FeatureSnapshot {
    #[serde(default)]
    tags: Vec<String>,
}

fn decode_feature_snapshot(event: &NotificationEvent) -> Result<FeatureSnapshot, SendError> {
    match &event.notification {
        Notification::DomainEvent(n) => {
            serde_json::from_str(&n.entity_data).map_err(|source| SendError::DecodeEntity {
                event_id: event.id.clone(),
                source,
            })
        }
        other => Err(SendError::SourceTypeMismatch {
            event_id: event.id.clone(),
            source_type: event.source_type,
            kind: other.kind(),
        }),
    }
}

/// The single `Sender` every producer submits events to.
pub struct NotificationSender {
    subscriptions: Arc<dyn SubscriptionStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
    metrics: Metrics,
}

impl NotificationSender {
    /// Creates a sender calling `notifiers` in the given order.
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        notifiers: Vec<Arc<dyn Notifier>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            subscriptions,
            notifiers,
            metrics,
        }
    }

    async fn list_subscriptions(
        &self,
        event: &NotificationEvent,
    ) -> Result<Vec<Subscription>, StoreError> {
        let source_types = [event.source_type];
        let store = self.subscriptions.as_ref();
        if event.is_admin_event {
            collect_all(LIST_PAGE_SIZE, |request| {
                store.list_enabled_admin_subscriptions(&source_types, request)
            })
            .await
        } else {
            collect_all(LIST_PAGE_SIZE, |request| {
                store.list_enabled_subscriptions(&event.environment_id, &source_types, request)
            })
            .await
        }
    }

    async fn fan_out(&self, event: &NotificationEvent) -> Result<(), SendError> {
        if event.notification.expected_source_type() != Some(event.source_type) {
            return Err(SendError::SourceTypeMismatch {
                event_id: event.id.clone(),
                source_type: event.source_type,
                kind: event.notification.kind(),
            });
        }
        let subscriptions = self
            .list_subscriptions(event)
            .await
            .map_err(SendError::ListSubscriptions)?;
        debug!(subscriptions = subscriptions.len(), "Resolved subscriptions");

        // Decoded on the first subscription that filters by tag.
        let mut snapshot: Option<FeatureSnapshot> = None;
        let mut last_error = None;

        for subscription in &subscriptions {
            if event.source_type == SourceType::DomainEventFeature
                && !subscription.feature_flag_tags.is_empty()
            {
                if snapshot.is_none() {
                    snapshot = Some(decode_feature_snapshot(event)?);
                }
                let tags = snapshot
                    .as_ref()
                    .map(|s| s.tags.as_slice())
                    .unwrap_or_default();
                if !contains_tags(&subscription.feature_flag_tags, tags) {
                    debug!(subscription_id = %subscription.id, "No matching tags, skipping");
                    continue;
                }
            }

            if let Err(e) = self.notify(subscription, &event.notification).await {
                error!(subscription_id = %subscription.id, error = %e, "Failed to notify subscription");
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Runs every notifier for one subscription, stopping at the first error.
    async fn notify(
        &self,
        subscription: &Subscription,
        notification: &Notification,
    ) -> Result<(), SendError> {
        let recipient = &subscription.recipient;
        for notifier in &self.notifiers {
            match notifier
                .notify(notification, recipient, &recipient.language)
                .await
            {
                Ok(()) => {
                    self.metrics
                        .increment_notification_delivered(notifier.name(), "success");
                }
                Err(source) => {
                    self.metrics
                        .increment_notification_delivered(notifier.name(), "fail");
                    return Err(SendError::Notify {
                        subscription_id: subscription.id.clone(),
                        notifier: notifier.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Sender for NotificationSender {
    #[instrument(
        skip_all,
        fields(
            event_id = %event.id,
            source_type = %event.source_type,
            admin = event.is_admin_event
        )
    )]
    async fn send(&self, event: &NotificationEvent) -> Result<(), SendError> {
        let kind = event.notification.kind();
        self.metrics.increment_sender_received(kind);

        let result = self.fan_out(event).await;
        match &result {
            Ok(()) => {
                self.metrics.increment_sender_handled(kind, "success");
                info!("Notification sent");
            }
            Err(e) => {
                self.metrics.increment_sender_handled(kind, "fail");
                error!(error = %e, "Failed to send notification");
            }
        }
        result
    }
}
