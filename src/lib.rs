/// Flag Notifier - notification dispatch for a feature-flag platform
///
/// This library turns domain-change events from a message stream and periodic
/// resource scans into notifications delivered to subscribed chat channels.
pub mod app;
pub mod batch;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod core;
pub mod error;
pub mod health;
pub mod internal_metrics;
pub mod notification;
pub mod pubsub;
pub mod scheduler;
pub mod stores;
pub mod task_manager;

// Re-export core types for convenience
pub use core::*;
