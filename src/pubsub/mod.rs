//! Consumption contract of the message bus.
//!
//! The bus client itself lives outside this crate. It plugs in through the
//! `Puller` trait and hands over `StreamMessage`s that must be acknowledged or
//! negatively acknowledged exactly once.

use crate::error::PullError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;

pub mod rate_limited;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use rate_limited::{PullerHandle, RateLimitedPuller};

/// Reports the outcome of a delivery back to the bus.
pub trait Acknowledger: Send + Sync {
    fn ack(&self, message_id: &str);
    fn nack(&self, message_id: &str);
}

/// A message delivered from a topic subscription.
///
/// `ack` and `nack` consume the message, so at most one of them can be called.
/// A message dropped without either is nacked.
pub struct StreamMessage {
    id: String,
    attributes: HashMap<String, String>,
    data: Vec<u8>,
    acker: Option<Arc<dyn Acknowledger>>,
    permits: Vec<OwnedSemaphorePermit>,
}

impl StreamMessage {
    pub fn new(
        id: impl Into<String>,
        attributes: HashMap<String, String>,
        data: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            id: id.into(),
            attributes,
            data,
            acker: Some(acker),
            permits: Vec::new(),
        }
    }

    /// The transport-level message id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns an attribute value, or `""` if it is absent.
    pub fn attribute(&self, key: &str) -> &str {
        self.attributes.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload size counted against the outstanding-bytes limit.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Holds flow-control permits until the message is settled.
    pub(crate) fn attach_permits(&mut self, permits: impl IntoIterator<Item = OwnedSemaphorePermit>) {
        self.permits.extend(permits);
    }

    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker.ack(&self.id);
        }
    }

    /// Requests redelivery.
    pub fn nack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker.nack(&self.id);
        }
    }
}

impl Drop for StreamMessage {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            warn!(message_id = %self.id, "Message dropped without ack, requesting redelivery");
            acker.nack(&self.id);
        }
    }
}

impl fmt::Debug for StreamMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamMessage")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("size", &self.data.len())
            .finish()
    }
}

/// A pull-based subscription.
#[async_trait]
pub trait Puller: Send + Sync {
    /// Waits for the next message.
    ///
    /// # Returns
    /// * `Ok(Some(message))` when a message was delivered
    /// * `Ok(None)` when the subscription is closed and will deliver no more
    /// * `Err` on a transport failure; callers may retry
    async fn pull(&self) -> Result<Option<StreamMessage>, PullError>;
}
