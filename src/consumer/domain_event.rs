//! Consumer of the platform's domain event topic.

use super::HandleCode;
use crate::config::ConsumerConfig;
use crate::core::{
    DomainEvent, DomainEventNotification, Environment, Notification, NotificationEvent, Sender,
};
use crate::health::HealthFlag;
use crate::internal_metrics::Metrics;
use crate::pubsub::{RateLimitedPuller, StreamMessage};
use crate::scheduler::{cancelled, Job};
use crate::stores::EnvironmentStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

const MESSAGE_TYPE: &str = "domain_event";
const ID_ATTRIBUTE: &str = "id";

/// Counts of one consumer run, by handling outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ok: usize,
    pub bad_message: usize,
    pub repeatable_error: usize,
    pub non_repeatable_error: usize,
}

impl RunSummary {
    fn record(&mut self, code: HandleCode) {
        match code {
            HandleCode::Ok => self.ok += 1,
            HandleCode::BadMessage => self.bad_message += 1,
            HandleCode::RepeatableError => self.repeatable_error += 1,
            HandleCode::NonRepeatableError => self.non_repeatable_error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.bad_message + self.repeatable_error + self.non_repeatable_error
    }
}

/// Turns domain-change messages into notification events.
///
/// Each scheduler trigger is one bounded run: the puller is started, messages
/// are handled one at a time until the run window elapses or the scheduler
/// cancels, then the puller is stopped.
pub struct DomainEventConsumer {
    puller: RateLimitedPuller,
    environments: Arc<dyn EnvironmentStore>,
    sender: Arc<dyn Sender>,
    metrics: Metrics,
    running_duration: Duration,
    handle_timeout: Duration,
}

impl DomainEventConsumer {
    pub fn new(
        puller: RateLimitedPuller,
        environments: Arc<dyn EnvironmentStore>,
        sender: Arc<dyn Sender>,
        metrics: Metrics,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            puller,
            environments,
            sender,
            metrics,
            running_duration: config.running_duration_per_batch(),
            handle_timeout: config.handle_timeout(),
        }
    }

    /// Health of the underlying subscription.
    pub fn health(&self) -> HealthFlag {
        self.puller.health()
    }

    /// Consumes until the run window elapses, `cancel` fires, or the
    /// subscription closes.
    ///
    /// A message already being handled is finished before the run returns.
    pub async fn consume(&self, mut cancel: watch::Receiver<bool>) -> RunSummary {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = self.puller.start(stop_rx);
        let window = tokio::time::sleep(self.running_duration);
        tokio::pin!(window);
        let mut summary = RunSummary::default();

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    debug!("Consumer run cancelled");
                    break;
                }
                _ = &mut window => {
                    debug!("Consumer run window elapsed");
                    break;
                }
                received = handle.messages().recv() => match received {
                    Ok(message) => summary.record(self.handle_message(message).await),
                    Err(_) => {
                        info!("Message channel closed, ending consumer run");
                        break;
                    }
                },
            }
        }

        let _ = stop_tx.send(true);
        handle.shutdown().await;
        info!(
            handled = summary.total(),
            ok = summary.ok,
            bad_message = summary.bad_message,
            repeatable_error = summary.repeatable_error,
            non_repeatable_error = summary.non_repeatable_error,
            "Consumer run finished"
        );
        summary
    }

    /// Handles one message and settles it.
    #[instrument(skip_all, fields(message_id = %message.id()))]
    pub async fn handle_message(&self, message: StreamMessage) -> HandleCode {
        let started = std::time::Instant::now();
        self.metrics.increment_message_received(MESSAGE_TYPE);

        let code = self.process(&message).await;
        if code.should_ack() {
            message.ack();
        } else {
            message.nack();
        }

        self.metrics
            .increment_message_handled(MESSAGE_TYPE, code.as_str());
        self.metrics.record_message_handle_duration(started.elapsed());
        code
    }

    async fn process(&self, message: &StreamMessage) -> HandleCode {
        let deadline = Instant::now() + self.handle_timeout;

        let id = message.attribute(ID_ATTRIBUTE);
        if id.is_empty() {
            warn!("Message has no id attribute");
            return HandleCode::BadMessage;
        }

        let event: DomainEvent = match serde_json::from_slice(message.data()) {
            Ok(event) => event,
            Err(e) => {
                warn!(id, error = %e, "Failed to decode domain event");
                return HandleCode::BadMessage;
            }
        };

        let environment = if event.is_admin_event {
            None
        } else {
            match timeout_at(
                deadline,
                self.environments
                    .get_environment_by_namespace(&event.environment_namespace),
            )
            .await
            {
                Ok(Ok(environment)) => Some(environment),
                Ok(Err(e)) if e.is_not_found() => {
                    warn!(
                        id,
                        namespace = %event.environment_namespace,
                        "Environment of domain event no longer exists"
                    );
                    return HandleCode::BadMessage;
                }
                Ok(Err(e)) => {
                    error!(
                        id,
                        namespace = %event.environment_namespace,
                        error = %e,
                        "Failed to look up environment"
                    );
                    return HandleCode::RepeatableError;
                }
                Err(_) => {
                    error!(id, namespace = %event.environment_namespace, "Environment lookup timed out");
                    return HandleCode::RepeatableError;
                }
            }
        };

        let Some(source_type) = event.entity_type.source_type() else {
            warn!(id, entity_type = %event.entity_type, "Entity type has no source type");
            return HandleCode::BadMessage;
        };

        let notification_event = build_event(event, environment, source_type);
        match timeout_at(deadline, self.sender.send(&notification_event)).await {
            Ok(Ok(())) => {
                debug!(id, event_id = %notification_event.id, "Domain event sent");
                HandleCode::Ok
            }
            Ok(Err(e)) => {
                error!(id, event_id = %notification_event.id, error = %e, "Failed to send notification");
                HandleCode::NonRepeatableError
            }
            Err(_) => {
                error!(id, event_id = %notification_event.id, "Sending notification timed out");
                HandleCode::NonRepeatableError
            }
        }
    }
}

fn build_event(
    event: DomainEvent,
    environment: Option<Environment>,
    source_type: crate::core::SourceType,
) -> NotificationEvent {
    let (environment_id, environment_url_code) = environment
        .map(|env| (env.id, env.url_code))
        .unwrap_or_default();
    let notification = Notification::DomainEvent(DomainEventNotification {
        environment_id: environment_id.clone(),
        environment_url_code,
        editor: event.editor,
        entity_type: event.entity_type,
        entity_id: event.entity_id,
        event_type: event.event_type,
        entity_data: event.entity_data,
    });
    NotificationEvent::new(environment_id, source_type, notification, event.is_admin_event)
}

#[async_trait]
impl Job for DomainEventConsumer {
    async fn run(&self, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.consume(cancel).await;
        Ok(())
    }
}
