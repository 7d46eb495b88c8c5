//! A notifier delivering to Slack-compatible incoming webhooks.

use super::locale::Localizer;
use super::render::{SlackMessage, SlackRenderer};
use crate::core::{Notification, Notifier, Recipient, RecipientKind};
use crate::error::NotifyError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Strips the secret path of a webhook URL for logging.
pub fn redact_webhook_url(webhook_url: &str) -> String {
    match reqwest::Url::parse(webhook_url) {
        Ok(url) => format!(
            "{}://{}/***",
            url.scheme(),
            url.host_str().unwrap_or_default()
        ),
        Err(_) => "***".to_string(),
    }
}

/// Renders notifications for Slack channel recipients and posts them.
///
/// Failed deliveries are not retried.
pub struct SlackNotifier {
    client: reqwest::Client,
    renderer: SlackRenderer,
}

impl SlackNotifier {
    /// Creates a notifier linking to the console at `web_url`.
    pub fn new(web_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            renderer: SlackRenderer::new(web_url),
        })
    }

    async fn post(&self, webhook_url: &str, message: &SlackMessage) -> Result<(), NotifyError> {
        let response = match self.client.post(webhook_url).json(message).send().await {
            Ok(response) => response,
            Err(e) => {
                let e = e.without_url();
                error!(
                    webhook = %redact_webhook_url(webhook_url),
                    error = %e,
                    "HTTP request to Slack failed"
                );
                return Err(NotifyError::Http(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(webhook = %redact_webhook_url(webhook_url), "Delivered Slack notification");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        error!(
            webhook = %redact_webhook_url(webhook_url),
            status = %status,
            body = %body,
            "Failed to send Slack notification"
        );
        Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    #[instrument(skip_all, fields(kind = notification.kind(), language = %language))]
    async fn notify(
        &self,
        notification: &Notification,
        recipient: &Recipient,
        language: &str,
    ) -> Result<(), NotifyError> {
        if recipient.kind != RecipientKind::SlackChannel {
            return Ok(());
        }
        let webhook_url = recipient
            .slack_channel_recipient
            .as_ref()
            .map(|r| r.webhook_url.as_str())
            .filter(|url| !url.is_empty())
            .ok_or(NotifyError::MissingChannelConfig("slack channel"))?;
        let localizer = Localizer::new(language)?;

        let message = self.renderer.render(notification, &localizer);
        self.post(webhook_url, &message).await
    }
}
