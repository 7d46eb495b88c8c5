//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments using the `clap` crate.
//! Global flags are merged on top of the TOML file and environment variables
//! through the `figment::Provider` implementation below.

use clap::{Parser, Subcommand, ValueEnum};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Notification dispatcher for feature-flag domain events and scheduled scans.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Logging filter, e.g. `debug` or `flag_notifier=trace`.
    #[arg(long, value_name = "FILTER", global = true)]
    pub log_level: Option<String>,

    /// Base URL of the web console used in notification links.
    #[arg(long, value_name = "URL", global = true)]
    pub web_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load and validate the configuration and print upcoming job runs.
    Validate {
        /// How many upcoming fire times to print per job.
        #[arg(long, default_value_t = 3)]
        upcoming: usize,
    },
    /// Render a sample notification and deliver it to a webhook.
    SendTest {
        /// The incoming webhook URL to deliver to.
        #[arg(long, value_name = "URL")]
        webhook_url: String,
        /// Recipient language code.
        #[arg(long, default_value = "en")]
        language: String,
        /// Which notification kind to render.
        #[arg(long, value_enum, default_value_t = SampleKind::DomainEvent)]
        kind: SampleKind,
    },
}

/// Notification kinds available to `send-test`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    DomainEvent,
    FeatureStale,
    ExperimentRunning,
    MauCount,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(url) = &self.web_url {
            dict.insert("web_url".into(), Value::from(url.clone()));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
