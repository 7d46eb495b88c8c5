//! Stream consumers.
//!
//! A consumer turns delivered `StreamMessage`s into `NotificationEvent`s and
//! settles every message with an ack or nack according to how handling ended.

pub mod domain_event;

pub use domain_event::DomainEventConsumer;

/// How handling of one message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleCode {
    /// The message was turned into an event and sent.
    Ok,
    /// Malformed or unresolvable. Acked and dropped.
    BadMessage,
    /// Transient infrastructure failure. Nacked for redelivery.
    RepeatableError,
    /// Valid, but downstream delivery failed. Acked anyway.
    NonRepeatableError,
}

impl HandleCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleCode::Ok => "ok",
            HandleCode::BadMessage => "bad_message",
            HandleCode::RepeatableError => "repeatable_error",
            HandleCode::NonRepeatableError => "non_repeatable_error",
        }
    }

    /// Whether the message is acknowledged rather than redelivered.
    pub fn should_ack(&self) -> bool {
        !matches!(self, HandleCode::RepeatableError)
    }
}
