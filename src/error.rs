//! Error types shared across the dispatch pipeline.
//!
//! Ports and components return these typed errors; jobs and the application
//! wiring fold them into `anyhow::Error` at the top level.

use crate::core::SourceType;
use thiserror::Error;

/// Errors returned by the resource and subscription store ports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Any other failure reported by the store.
    #[error("store internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Errors returned by a `Notifier`.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("unsupported language: {0:?}")]
    UnsupportedLanguage(String),
    #[error("recipient has no {0} configuration")]
    MissingChannelConfig(&'static str),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors returned by `Sender::send`.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to list subscriptions: {0}")]
    ListSubscriptions(#[source] StoreError),
    #[error("failed to decode entity snapshot for event {event_id}: {source}")]
    DecodeEntity {
        event_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("event {event_id} has source type {source_type} but carries a {kind} notification")]
    SourceTypeMismatch {
        event_id: String,
        source_type: SourceType,
        kind: &'static str,
    },
    #[error("notifier {notifier} failed for subscription {subscription_id}: {source}")]
    Notify {
        subscription_id: String,
        notifier: String,
        #[source]
        source: NotifyError,
    },
}

/// Errors returned by the job scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression {expression:?} for job {name}: {source}")]
    InvalidCron {
        name: String,
        expression: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("job {0} is already registered")]
    DuplicateJob(String),
    #[error("scheduler has already been started")]
    AlreadyStarted,
    #[error("scheduler has been stopped")]
    Stopped,
}

/// Errors surfaced by a message-bus `Puller`.
#[derive(Debug, Clone, Error)]
pub enum PullError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("unknown time zone {0:?}")]
    UnknownTimezone(String),
}
