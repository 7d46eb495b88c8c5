//! flag-notifier - feature flag notification dispatcher
//!
//! The dispatcher itself is embedded by the platform through `App`, which is
//! wired against the platform's stores and event subscription. This binary
//! covers the operator tasks that need no backend: checking a configuration
//! and sending a sample notification to a webhook.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use flag_notifier::{
    batch::last_year_month,
    cli::{Cli, Command, SampleKind},
    config::{Config, LogFormat},
    core::{
        DomainEventNotification, Editor, EntityType, Experiment, ExperimentRunningNotification,
        ExperimentStatus, Feature, FeatureLastUsedInfo, FeatureStaleNotification,
        MauCountNotification, Notification, Notifier, Recipient,
    },
    notification::SlackNotifier,
    scheduler::parse_cron,
};
use itertools::Itertools;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            // No configured filter yet, fall back to the defaults.
            tracing_subscriber::fmt().init();
            error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    match cli.command {
        Command::Validate { upcoming } => validate(&config, upcoming),
        Command::SendTest {
            webhook_url,
            language,
            kind,
        } => send_test(&config, &webhook_url, &language, kind).await,
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn validate(config: &Config, upcoming: usize) -> Result<()> {
    let timezone = config.scheduler.timezone()?;
    info!(timezone = %timezone, web_url = %config.web_url, "Configuration is valid");

    for (job, expression) in config.job_schedules() {
        let schedule = parse_cron(expression)
            .with_context(|| format!("invalid schedule for {job}"))?;
        let times = schedule
            .upcoming(timezone)
            .take(upcoming)
            .map(|time| time.to_rfc3339())
            .join(", ");
        println!("{job:<28} {expression:<16} {times}");
    }
    Ok(())
}

async fn send_test(
    config: &Config,
    webhook_url: &str,
    language: &str,
    kind: SampleKind,
) -> Result<()> {
    let notifier = SlackNotifier::new(&config.web_url, config.slack.request_timeout())?;
    let notification = sample_notification(config, kind)?;
    let recipient = Recipient::slack(webhook_url, language);

    notifier
        .notify(&notification, &recipient, language)
        .await
        .context("failed to deliver sample notification")?;
    info!(kind = notification.kind(), "Sample notification delivered");
    Ok(())
}

fn sample_notification(config: &Config, kind: SampleKind) -> Result<Notification> {
    let environment_id = "sample-environment".to_string();
    let environment_url_code = "sample".to_string();
    let now = Utc::now();

    let notification = match kind {
        SampleKind::DomainEvent => Notification::DomainEvent(DomainEventNotification {
            environment_id,
            environment_url_code,
            editor: Editor {
                email: "operator@example.com".to_string(),
                name: "Operator".to_string(),
                is_admin: false,
            },
            entity_type: EntityType::Feature,
            entity_id: "sample-feature".to_string(),
            event_type: "FEATURE_CREATED".to_string(),
            entity_data: r#"{"id":"sample-feature","tags":["sample"]}"#.to_string(),
        }),
        SampleKind::FeatureStale => Notification::FeatureStale(FeatureStaleNotification {
            environment_id,
            environment_url_code,
            features: vec![Feature {
                id: "sample-feature".to_string(),
                name: "Sample feature".to_string(),
                enabled: true,
                last_used_info: Some(FeatureLastUsedInfo {
                    last_used_at: now.timestamp() - config.watchers.stale_threshold_seconds - 1,
                }),
                ..Default::default()
            }],
        }),
        SampleKind::ExperimentRunning => {
            Notification::ExperimentRunning(ExperimentRunningNotification {
                environment_id,
                environment_url_code,
                experiments: vec![Experiment {
                    id: "sample-experiment".to_string(),
                    name: "Sample experiment".to_string(),
                    feature_id: "sample-feature".to_string(),
                    status: ExperimentStatus::Running,
                    start_at: now.timestamp() - 86_400,
                    stop_at: now.timestamp() + 86_400,
                }],
            })
        }
        SampleKind::MauCount => {
            let (year, month) =
                last_year_month(now, config.watchers.mau_reference_timezone()?);
            Notification::MauCount(MauCountNotification {
                environment_id,
                environment_url_code,
                event_count: 1_000,
                user_count: 100,
                year,
                month,
            })
        }
    };
    Ok(notification)
}
