//! Configuration management for the notification dispatcher
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults, a TOML file, environment variables, and
//! command-line overrides.

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::scheduler::parse_cron;
use anyhow::Result;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

pub const DOMAIN_EVENT_JOB: &str = "domain_event_consumer";
pub const FEATURE_STALE_JOB: &str = "feature_stale_watcher";
pub const EXPERIMENT_RUNNING_JOB: &str = "experiment_running_watcher";
pub const MAU_COUNT_JOB: &str = "mau_count_watcher";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging filter for the application, e.g. `info` or `flag_notifier=debug`.
    pub log_level: String,
    /// The log line format.
    pub log_format: LogFormat,
    /// Base URL of the web console, used for links in notifications.
    pub web_url: String,
    /// Configuration for the metrics and health endpoint.
    pub metrics: MetricsConfig,
    /// Flow control for the domain event subscription.
    pub puller: PullerConfig,
    /// Configuration for the domain event consumer job.
    pub consumer: ConsumerConfig,
    /// Configuration for the job scheduler.
    pub scheduler: SchedulerConfig,
    /// Configuration for the batch watchers.
    pub watchers: WatchersConfig,
    /// Configuration for Slack webhook delivery.
    pub slack: SlackConfig,
}

/// The format for log output.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the metrics and health server.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

/// Flow control applied to the domain event subscription.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PullerConfig {
    /// Number of concurrent pull workers.
    pub concurrency: usize,
    /// Maximum number of delivered but unacknowledged messages.
    pub max_outstanding_messages: usize,
    /// Maximum total payload size of delivered but unacknowledged messages.
    pub max_outstanding_bytes: usize,
    /// Ceiling on messages handed to the consumer per second.
    pub max_messages_per_second: u32,
}

/// Configuration for the domain event consumer job.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Cron schedule that starts a consumer run.
    pub schedule: String,
    /// How long one run keeps consuming before it is cancelled.
    pub running_duration_per_batch_seconds: u64,
    /// Deadline for handling a single message.
    pub handle_timeout_seconds: u64,
}

impl ConsumerConfig {
    pub fn running_duration_per_batch(&self) -> Duration {
        Duration::from_secs(self.running_duration_per_batch_seconds)
    }

    pub fn handle_timeout(&self) -> Duration {
        Duration::from_secs(self.handle_timeout_seconds)
    }
}

/// Configuration for the job scheduler.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// IANA time zone cron schedules are evaluated in.
    pub timezone: String,
    /// How long `stop` waits for in-flight runs before aborting them.
    pub stop_grace_seconds: u64,
}

impl SchedulerConfig {
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        parse_timezone(&self.timezone)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

/// Schedule and run budget of one batch watcher.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherJobConfig {
    pub schedule: String,
    pub timeout_seconds: u64,
}

impl WatcherJobConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Configuration for the batch watchers.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchersConfig {
    pub feature_stale: WatcherJobConfig,
    pub experiment_running: WatcherJobConfig,
    pub mau_count: WatcherJobConfig,
    /// A flag unused for longer than this is reported as stale.
    pub stale_threshold_seconds: i64,
    /// IANA time zone in which "previous month" is computed.
    pub mau_reference_timezone: String,
}

impl WatchersConfig {
    pub fn mau_reference_timezone(&self) -> Result<Tz, ConfigError> {
        parse_timezone(&self.mau_reference_timezone)
    }
}

/// Configuration for Slack webhook delivery.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SlackConfig {
    pub request_timeout_seconds: u64,
}

impl SlackConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
}

impl Config {
    /// Loads the configuration by layering defaults, the optional TOML file
    /// named on the command line, `FLAG_NOTIFIER_` environment variables, and
    /// command-line overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            // e.g. FLAG_NOTIFIER_PULLER__CONCURRENCY=4
            .merge(Env::prefixed("FLAG_NOTIFIER_").split("__"))
            .merge(cli)
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the fields `figment` cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web_url.trim().is_empty() {
            return Err(ConfigError::Invalid("web_url must be set".to_string()));
        }
        if self.puller.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "puller.concurrency must be at least 1".to_string(),
            ));
        }
        if self.puller.max_outstanding_messages == 0 || self.puller.max_outstanding_bytes == 0 {
            return Err(ConfigError::Invalid(
                "puller outstanding limits must be positive".to_string(),
            ));
        }
        if self.puller.max_messages_per_second == 0 {
            return Err(ConfigError::Invalid(
                "puller.max_messages_per_second must be at least 1".to_string(),
            ));
        }
        if self.consumer.running_duration_per_batch_seconds == 0 {
            return Err(ConfigError::Invalid(
                "consumer.running_duration_per_batch_seconds must be positive".to_string(),
            ));
        }
        if self.consumer.handle_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "consumer.handle_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.slack.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "slack.request_timeout_seconds must be positive".to_string(),
            ));
        }
        for (name, job) in [
            (FEATURE_STALE_JOB, &self.watchers.feature_stale),
            (EXPERIMENT_RUNNING_JOB, &self.watchers.experiment_running),
            (MAU_COUNT_JOB, &self.watchers.mau_count),
        ] {
            if job.timeout_seconds == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeout_seconds of {name} must be positive"
                )));
            }
        }
        if self.watchers.stale_threshold_seconds <= 0 {
            return Err(ConfigError::Invalid(
                "watchers.stale_threshold_seconds must be positive".to_string(),
            ));
        }
        for (name, expression) in self.job_schedules() {
            parse_cron(expression).map_err(|e| {
                ConfigError::Invalid(format!("invalid schedule {expression:?} for {name}: {e}"))
            })?;
        }
        self.scheduler.timezone()?;
        self.watchers.mau_reference_timezone()?;
        Ok(())
    }

    /// The cron schedule of every job, keyed by job name.
    pub fn job_schedules(&self) -> [(&'static str, &str); 4] {
        [
            (DOMAIN_EVENT_JOB, self.consumer.schedule.as_str()),
            (FEATURE_STALE_JOB, self.watchers.feature_stale.schedule.as_str()),
            (
                EXPERIMENT_RUNNING_JOB,
                self.watchers.experiment_running.schedule.as_str(),
            ),
            (MAU_COUNT_JOB, self.watchers.mau_count.schedule.as_str()),
        ]
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            web_url: "http://localhost:8080".to_string(),
            metrics: MetricsConfig {
                enabled: true,
                listen_address: SocketAddr::from(([0, 0, 0, 0], 9090)),
            },
            puller: PullerConfig {
                concurrency: 1,
                max_outstanding_messages: 1000,
                max_outstanding_bytes: 100 * 1024 * 1024,
                max_messages_per_second: 5000,
            },
            consumer: ConsumerConfig {
                schedule: "* * * * *".to_string(),
                running_duration_per_batch_seconds: 50,
                handle_timeout_seconds: 5,
            },
            scheduler: SchedulerConfig {
                timezone: "Asia/Tokyo".to_string(),
                stop_grace_seconds: 30,
            },
            watchers: WatchersConfig {
                // Every Monday at 10:00.
                feature_stale: WatcherJobConfig {
                    schedule: "0 10 * * MON".to_string(),
                    timeout_seconds: 300,
                },
                // Every day at 10:00.
                experiment_running: WatcherJobConfig {
                    schedule: "0 10 * * *".to_string(),
                    timeout_seconds: 300,
                },
                // The 1st of every month at 10:00.
                mau_count: WatcherJobConfig {
                    schedule: "0 10 1 * *".to_string(),
                    timeout_seconds: 300,
                },
                stale_threshold_seconds: 90 * 24 * 60 * 60,
                mau_reference_timezone: "Asia/Tokyo".to_string(),
            },
            slack: SlackConfig {
                request_timeout_seconds: 10,
            },
        }
    }
}
