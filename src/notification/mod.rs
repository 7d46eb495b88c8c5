//! Delivery of notification events to subscribed channels.
//!
//! `NotificationSender` is the fan-out point every producer submits to. It
//! resolves the interested subscriptions, applies feature tag filtering, and
//! calls each configured `Notifier`. `SlackNotifier` renders and posts to
//! Slack-compatible incoming webhooks.

pub mod locale;
pub mod render;
pub mod sender;
pub mod slack;

pub use sender::{contains_tags, NotificationSender};
pub use slack::SlackNotifier;
