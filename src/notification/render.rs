//! Renders notifications as Slack incoming-webhook messages.
//!
//! Every notification case has its own layout. Links point at the web console
//! so readers can jump from the message to the changed entity or environment.

use super::locale::{Localizer, Message};
use crate::core::{
    DomainEventNotification, EntityType, ExperimentRunningNotification,
    FeatureStaleNotification, MauCountNotification, Notification,
};
use chrono::DateTime;
use serde::Serialize;

const DOMAIN_EVENT_COLOR: &str = "#36a64f";
const FEATURE_STALE_COLOR: &str = "warning";
const EXPERIMENT_RUNNING_COLOR: &str = "#439fe0";
const MAU_COUNT_COLOR: &str = "good";

/// The JSON body posted to an incoming webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub color: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

impl Field {
    fn short(title: &str, value: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            value: value.into(),
            short: true,
        }
    }
}

/// Escapes the characters Slack treats as control sequences.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Builds Slack messages with links into the web console at `web_url`.
#[derive(Debug, Clone)]
pub struct SlackRenderer {
    web_url: String,
}

impl SlackRenderer {
    pub fn new(web_url: impl Into<String>) -> Self {
        let web_url: String = web_url.into();
        Self {
            web_url: web_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn render(&self, notification: &Notification, localizer: &Localizer) -> SlackMessage {
        match notification {
            Notification::DomainEvent(n) => self.render_domain_event(n, localizer),
            Notification::FeatureStale(n) => self.render_feature_stale(n, localizer),
            Notification::ExperimentRunning(n) => self.render_experiment_running(n, localizer),
            Notification::MauCount(n) => self.render_mau_count(n, localizer),
        }
    }

    fn environment_url(&self, url_code: &str) -> String {
        if url_code.is_empty() {
            self.web_url.clone()
        } else {
            format!("{}/{}", self.web_url, url_code)
        }
    }

    /// Console page of an entity, falling back to its list or environment page.
    fn entity_url(&self, entity_type: EntityType, entity_id: &str, url_code: &str) -> String {
        let admin = |page: &str| format!("{}/admin/{page}", self.web_url);
        let scoped = |page: &str| format!("{}/{page}", self.environment_url(url_code));
        match entity_type {
            EntityType::Feature => scoped(&format!("features/{entity_id}")),
            EntityType::Experiment => scoped(&format!("experiments/{entity_id}")),
            EntityType::Goal => scoped(&format!("goals/{entity_id}")),
            EntityType::Segment => scoped(&format!("segments/{entity_id}")),
            EntityType::Push => scoped("push"),
            EntityType::Apikey => scoped("apikeys"),
            EntityType::Account => scoped("accounts"),
            EntityType::Subscription => scoped("notifications"),
            EntityType::AdminAccount => admin("accounts"),
            EntityType::AdminSubscription => admin("notifications"),
            EntityType::Environment => admin("environments"),
            EntityType::Project => admin("projects"),
            EntityType::Organization => admin("organizations"),
            EntityType::AutoopsRule
            | EntityType::ProgressiveRollout
            | EntityType::FlagTrigger
            | EntityType::Webhook
            | EntityType::Tag
            | EntityType::CodeRef
            | EntityType::Team
            | EntityType::Unknown => self.environment_url(url_code),
        }
    }

    fn render_domain_event(
        &self,
        n: &DomainEventNotification,
        localizer: &Localizer,
    ) -> SlackMessage {
        let editor = if n.editor.name.is_empty() {
            n.editor.email.clone()
        } else {
            format!("{} ({})", n.editor.name, n.editor.email)
        };
        let mut fields = vec![
            Field::short(localizer.text(Message::Editor), escape(&editor)),
            Field::short(localizer.text(Message::Event), escape(&n.event_type)),
        ];
        if !n.environment_url_code.is_empty() {
            fields.push(Field::short(
                localizer.text(Message::Environment),
                escape(&n.environment_url_code),
            ));
        }

        SlackMessage {
            text: localizer.text(Message::DomainEventHeader).to_string(),
            attachments: vec![Attachment {
                color: DOMAIN_EVENT_COLOR.to_string(),
                title: format!(
                    "{}: {}",
                    localizer.entity_type(n.entity_type),
                    escape(&n.entity_id)
                ),
                title_link: self.entity_url(n.entity_type, &n.entity_id, &n.environment_url_code),
                text: String::new(),
                fields,
            }],
        }
    }

    fn render_feature_stale(
        &self,
        n: &FeatureStaleNotification,
        localizer: &Localizer,
    ) -> SlackMessage {
        let lines: Vec<String> = n
            .features
            .iter()
            .map(|f| {
                format!(
                    "• <{}|{}>",
                    self.entity_url(EntityType::Feature, &f.id, &n.environment_url_code),
                    escape(&f.name)
                )
            })
            .collect();
        SlackMessage {
            text: localizer.text(Message::FeatureStaleHeader).to_string(),
            attachments: vec![self.environment_attachment(
                FEATURE_STALE_COLOR,
                &n.environment_url_code,
                lines.join("\n"),
                Vec::new(),
                localizer,
            )],
        }
    }

    fn render_experiment_running(
        &self,
        n: &ExperimentRunningNotification,
        localizer: &Localizer,
    ) -> SlackMessage {
        let lines: Vec<String> = n
            .experiments
            .iter()
            .map(|e| {
                let link = format!(
                    "• <{}|{}>",
                    self.entity_url(EntityType::Experiment, &e.id, &n.environment_url_code),
                    escape(&e.name)
                );
                match DateTime::from_timestamp(e.stop_at, 0) {
                    Some(stop_at) if e.stop_at > 0 => format!(
                        "{link} ({} {})",
                        localizer.text(Message::Ends),
                        stop_at.format("%Y-%m-%d")
                    ),
                    _ => link,
                }
            })
            .collect();
        SlackMessage {
            text: localizer.text(Message::ExperimentRunningHeader).to_string(),
            attachments: vec![self.environment_attachment(
                EXPERIMENT_RUNNING_COLOR,
                &n.environment_url_code,
                lines.join("\n"),
                Vec::new(),
                localizer,
            )],
        }
    }

    fn render_mau_count(&self, n: &MauCountNotification, localizer: &Localizer) -> SlackMessage {
        let fields = vec![
            Field::short(
                localizer.text(Message::Month),
                format!("{}-{:02}", n.year, n.month),
            ),
            Field::short(localizer.text(Message::EventCount), n.event_count.to_string()),
            Field::short(localizer.text(Message::UserCount), n.user_count.to_string()),
        ];
        SlackMessage {
            text: localizer.text(Message::MauCountHeader).to_string(),
            attachments: vec![self.environment_attachment(
                MAU_COUNT_COLOR,
                &n.environment_url_code,
                String::new(),
                fields,
                localizer,
            )],
        }
    }

    fn environment_attachment(
        &self,
        color: &str,
        url_code: &str,
        text: String,
        fields: Vec<Field>,
        localizer: &Localizer,
    ) -> Attachment {
        Attachment {
            color: color.to_string(),
            title: format!("{}: {}", localizer.text(Message::Environment), escape(url_code)),
            title_link: self.environment_url(url_code),
            text,
            fields,
        }
    }
}
