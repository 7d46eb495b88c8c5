#![allow(dead_code)]
use async_trait::async_trait;
use flag_notifier::core::{NotificationEvent, Sender};
use flag_notifier::error::{SendError, StoreError};
use std::sync::{Arc, Mutex};

/// A sender that records submitted events.
///
/// Events for environments listed in `failing_environments` are recorded and
/// then rejected.
#[derive(Clone, Default)]
pub struct RecordingSender {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
    failing_environments: Arc<Mutex<Vec<String>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for_environment(&self, environment_id: &str) {
        self.failing_environments
            .lock()
            .unwrap()
            .push(environment_id.to_string());
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, event: &NotificationEvent) -> Result<(), SendError> {
        self.events.lock().unwrap().push(event.clone());
        if self
            .failing_environments
            .lock()
            .unwrap()
            .contains(&event.environment_id)
        {
            return Err(SendError::ListSubscriptions(StoreError::Unavailable(
                format!("subscriptions of {}", event.environment_id),
            )));
        }
        Ok(())
    }
}
