//! Core domain types and service traits for the notification pipeline
//!
//! This module defines the data exchanged between the producers (stream
//! consumer and batch watchers), the sender, and the notifiers, along with the
//! trait contracts that connect them.

use crate::error::{NotifyError, SendError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which kind of domain activity or scan a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    DomainEventFeature,
    DomainEventGoal,
    DomainEventExperiment,
    DomainEventAccount,
    DomainEventApikey,
    DomainEventSegment,
    DomainEventEnvironment,
    DomainEventAdminAccount,
    DomainEventAutoopsRule,
    DomainEventPush,
    DomainEventSubscription,
    DomainEventAdminSubscription,
    DomainEventProject,
    DomainEventWebhook,
    DomainEventProgressiveRollout,
    DomainEventOrganization,
    DomainEventFlagTrigger,
    DomainEventTag,
    DomainEventCodeRef,
    DomainEventTeam,
    FeatureStale,
    ExperimentRunning,
    MauCount,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::DomainEventFeature => "DOMAIN_EVENT_FEATURE",
            SourceType::DomainEventGoal => "DOMAIN_EVENT_GOAL",
            SourceType::DomainEventExperiment => "DOMAIN_EVENT_EXPERIMENT",
            SourceType::DomainEventAccount => "DOMAIN_EVENT_ACCOUNT",
            SourceType::DomainEventApikey => "DOMAIN_EVENT_APIKEY",
            SourceType::DomainEventSegment => "DOMAIN_EVENT_SEGMENT",
            SourceType::DomainEventEnvironment => "DOMAIN_EVENT_ENVIRONMENT",
            SourceType::DomainEventAdminAccount => "DOMAIN_EVENT_ADMIN_ACCOUNT",
            SourceType::DomainEventAutoopsRule => "DOMAIN_EVENT_AUTOOPS_RULE",
            SourceType::DomainEventPush => "DOMAIN_EVENT_PUSH",
            SourceType::DomainEventSubscription => "DOMAIN_EVENT_SUBSCRIPTION",
            SourceType::DomainEventAdminSubscription => "DOMAIN_EVENT_ADMIN_SUBSCRIPTION",
            SourceType::DomainEventProject => "DOMAIN_EVENT_PROJECT",
            SourceType::DomainEventWebhook => "DOMAIN_EVENT_WEBHOOK",
            SourceType::DomainEventProgressiveRollout => "DOMAIN_EVENT_PROGRESSIVE_ROLLOUT",
            SourceType::DomainEventOrganization => "DOMAIN_EVENT_ORGANIZATION",
            SourceType::DomainEventFlagTrigger => "DOMAIN_EVENT_FLAG_TRIGGER",
            SourceType::DomainEventTag => "DOMAIN_EVENT_TAG",
            SourceType::DomainEventCodeRef => "DOMAIN_EVENT_CODE_REF",
            SourceType::DomainEventTeam => "DOMAIN_EVENT_TEAM",
            SourceType::FeatureStale => "FEATURE_STALE",
            SourceType::ExperimentRunning => "EXPERIMENT_RUNNING",
            SourceType::MauCount => "MAU_COUNT",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of entity a domain event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Feature,
    Goal,
    Experiment,
    Account,
    Apikey,
    Segment,
    Environment,
    AdminAccount,
    AutoopsRule,
    Push,
    Subscription,
    AdminSubscription,
    Project,
    Webhook,
    ProgressiveRollout,
    Organization,
    FlagTrigger,
    Tag,
    CodeRef,
    Team,
    /// Any entity type this build does not know about.
    #[serde(other)]
    Unknown,
}

impl EntityType {
    /// Maps an entity type onto the subscription source type that listens to it.
    ///
    /// Returns `None` for entity types no subscription can listen to.
    pub fn source_type(&self) -> Option<SourceType> {
        let source_type = match self {
            EntityType::Feature => SourceType::DomainEventFeature,
            EntityType::Goal => SourceType::DomainEventGoal,
            EntityType::Experiment => SourceType::DomainEventExperiment,
            EntityType::Account => SourceType::DomainEventAccount,
            EntityType::Apikey => SourceType::DomainEventApikey,
            EntityType::Segment => SourceType::DomainEventSegment,
            EntityType::Environment => SourceType::DomainEventEnvironment,
            EntityType::AdminAccount => SourceType::DomainEventAdminAccount,
            EntityType::AutoopsRule => SourceType::DomainEventAutoopsRule,
            EntityType::Push => SourceType::DomainEventPush,
            EntityType::Subscription => SourceType::DomainEventSubscription,
            EntityType::AdminSubscription => SourceType::DomainEventAdminSubscription,
            EntityType::Project => SourceType::DomainEventProject,
            EntityType::Webhook => SourceType::DomainEventWebhook,
            EntityType::ProgressiveRollout => SourceType::DomainEventProgressiveRollout,
            EntityType::Organization => SourceType::DomainEventOrganization,
            EntityType::FlagTrigger => SourceType::DomainEventFlagTrigger,
            EntityType::Tag => SourceType::DomainEventTag,
            EntityType::CodeRef => SourceType::DomainEventCodeRef,
            EntityType::Team => SourceType::DomainEventTeam,
            EntityType::Unknown => return None,
        };
        Some(source_type)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Feature => "FEATURE",
            EntityType::Goal => "GOAL",
            EntityType::Experiment => "EXPERIMENT",
            EntityType::Account => "ACCOUNT",
            EntityType::Apikey => "APIKEY",
            EntityType::Segment => "SEGMENT",
            EntityType::Environment => "ENVIRONMENT",
            EntityType::AdminAccount => "ADMIN_ACCOUNT",
            EntityType::AutoopsRule => "AUTOOPS_RULE",
            EntityType::Push => "PUSH",
            EntityType::Subscription => "SUBSCRIPTION",
            EntityType::AdminSubscription => "ADMIN_SUBSCRIPTION",
            EntityType::Project => "PROJECT",
            EntityType::Webhook => "WEBHOOK",
            EntityType::ProgressiveRollout => "PROGRESSIVE_ROLLOUT",
            EntityType::Organization => "ORGANIZATION",
            EntityType::FlagTrigger => "FLAG_TRIGGER",
            EntityType::Tag => "TAG",
            EntityType::CodeRef => "CODE_REF",
            EntityType::Team => "TEAM",
            EntityType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The account that caused a domain event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Editor {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// A domain-change record as published on the domain event topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub editor: Editor,
    #[serde(default)]
    pub environment_namespace: String,
    #[serde(default)]
    pub is_admin_event: bool,
    /// JSON snapshot of the entity after the change.
    #[serde(default)]
    pub entity_data: String,
    #[serde(default)]
    pub previous_entity_data: String,
}

/// A platform environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    /// The short code used in web console URLs.
    pub url_code: String,
    pub project_id: String,
    #[serde(default)]
    pub archived: bool,
}

/// A project grouping environments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
}

/// When a feature flag was last evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureLastUsedInfo {
    /// Unix seconds.
    pub last_used_at: i64,
}

/// A feature flag as returned by the feature store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub archived: bool,
    /// Variation id served when the flag is off. Empty when unset.
    #[serde(default)]
    pub off_variation: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_used_info: Option<FeatureLastUsedInfo>,
}

impl Feature {
    pub fn is_disabled_and_off_variation_empty(&self) -> bool {
        !self.enabled && self.off_variation.is_empty()
    }
}

/// The lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Waiting,
    Running,
    Stopped,
    ForceStopped,
}

/// An experiment as returned by the experiment store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub feature_id: String,
    pub status: ExperimentStatus,
    /// Unix seconds.
    pub start_at: i64,
    /// Unix seconds.
    pub stop_at: i64,
}

/// Aggregated usage for one environment over one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MauCount {
    pub event_count: i64,
    pub user_count: i64,
}

/// The channel kind a recipient is delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientKind {
    SlackChannel,
    /// A channel kind this build cannot deliver to.
    #[serde(other)]
    Unknown,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::SlackChannel => "slack_channel",
            RecipientKind::Unknown => "unknown",
        }
    }
}

/// Slack-compatible incoming webhook settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackChannelRecipient {
    pub webhook_url: String,
}

/// Where and in which language a subscription is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub kind: RecipientKind,
    /// Language code, e.g. `en` or `ja`.
    pub language: String,
    #[serde(default)]
    pub slack_channel_recipient: Option<SlackChannelRecipient>,
}

impl Recipient {
    /// Convenience constructor for a Slack webhook recipient.
    pub fn slack(webhook_url: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            kind: RecipientKind::SlackChannel,
            language: language.into(),
            slack_channel_recipient: Some(SlackChannelRecipient {
                webhook_url: webhook_url.into(),
            }),
        }
    }
}

/// A stored preference linking a source type to a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// Empty for admin-scope subscriptions.
    #[serde(default)]
    pub environment_id: String,
    pub source_types: Vec<SourceType>,
    pub recipient: Recipient,
    /// When non-empty, feature domain events are only delivered if the
    /// feature carries at least one of these tags.
    #[serde(default)]
    pub feature_flag_tags: Vec<String>,
    pub enabled: bool,
}

/// Payload of a notification raised by a domain-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEventNotification {
    pub environment_id: String,
    pub environment_url_code: String,
    pub editor: Editor,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub event_type: String,
    /// JSON snapshot of the entity after the change.
    pub entity_data: String,
}

/// Payload listing the stale feature flags of one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStaleNotification {
    pub environment_id: String,
    pub environment_url_code: String,
    pub features: Vec<Feature>,
}

/// Payload listing the running experiments of one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRunningNotification {
    pub environment_id: String,
    pub environment_url_code: String,
    pub experiments: Vec<Experiment>,
}

/// Payload with one environment's monthly active user aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MauCountNotification {
    pub environment_id: String,
    pub environment_url_code: String,
    pub event_count: i64,
    pub user_count: i64,
    pub year: i32,
    pub month: u32,
}

/// The content of a notification, one case per event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    DomainEvent(DomainEventNotification),
    FeatureStale(FeatureStaleNotification),
    ExperimentRunning(ExperimentRunningNotification),
    MauCount(MauCountNotification),
}

impl Notification {
    /// A short label used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::DomainEvent(_) => "domain_event",
            Notification::FeatureStale(_) => "feature_stale",
            Notification::ExperimentRunning(_) => "experiment_running",
            Notification::MauCount(_) => "mau_count",
        }
    }

    /// The source type subscriptions must listen to for this notification.
    ///
    /// `None` for domain events of an entity type with no source type.
    pub fn expected_source_type(&self) -> Option<SourceType> {
        match self {
            Notification::DomainEvent(n) => n.entity_type.source_type(),
            Notification::FeatureStale(_) => Some(SourceType::FeatureStale),
            Notification::ExperimentRunning(_) => Some(SourceType::ExperimentRunning),
            Notification::MauCount(_) => Some(SourceType::MauCount),
        }
    }
}

/// The canonical unit of work submitted to the `Sender`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: String,
    /// Empty for admin events.
    pub environment_id: String,
    pub source_type: SourceType,
    pub notification: Notification,
    pub is_admin_event: bool,
}

impl NotificationEvent {
    /// Creates an event with a freshly generated id.
    pub fn new(
        environment_id: impl Into<String>,
        source_type: SourceType,
        notification: Notification,
        is_admin_event: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            environment_id: environment_id.into(),
            source_type,
            notification,
            is_admin_event,
        }
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Resolves interested subscriptions for an event and fans it out.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Delivers the event to every eligible subscription.
    ///
    /// # Returns
    /// * `Ok(())` if every eligible subscription was notified
    /// * `Err` with the last error seen otherwise; other subscriptions may
    ///   still have been notified
    async fn send(&self, event: &NotificationEvent) -> Result<(), SendError>;
}

/// Renders and delivers a notification through one channel kind.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A unique, descriptive name for the notifier (e.g., "slack").
    /// Used for logging and metrics.
    fn name(&self) -> &str;

    /// Delivers a notification to a recipient.
    ///
    /// Recipients of a different channel kind are ignored and reported as
    /// success.
    async fn notify(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        language: &str,
    ) -> Result<(), NotifyError>;
}
