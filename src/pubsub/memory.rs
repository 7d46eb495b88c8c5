//! An in-memory `Puller` for tests.

use super::{Acknowledger, Puller, StreamMessage};
use crate::error::PullError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct Outcomes {
    acked: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
}

impl Acknowledger for Outcomes {
    fn ack(&self, message_id: &str) {
        self.acked.lock().unwrap().push(message_id.to_string());
    }

    fn nack(&self, message_id: &str) {
        self.nacked.lock().unwrap().push(message_id.to_string());
    }
}

/// A queue of messages served in push order.
///
/// By default the subscription reports itself closed once the queue is
/// empty. `keep_open` makes `pull` wait for more messages instead.
#[derive(Default)]
pub struct MemoryPuller {
    queue: Mutex<VecDeque<(String, HashMap<String, String>, Vec<u8>)>>,
    errors: Mutex<VecDeque<PullError>>,
    outcomes: Arc<Outcomes>,
    pushed: Notify,
    keep_open: bool,
    next_id: AtomicUsize,
}

impl MemoryPuller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    /// Queues a message and returns its transport id.
    pub fn push(&self, attributes: HashMap<String, String>, data: Vec<u8>) -> String {
        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.queue
            .lock()
            .unwrap()
            .push_back((id.clone(), attributes, data));
        self.pushed.notify_one();
        id
    }

    /// Queues a message whose `id` attribute is `id`.
    pub fn push_with_id(&self, id: &str, data: Vec<u8>) -> String {
        let attributes = HashMap::from([("id".to_string(), id.to_string())]);
        self.push(attributes, data)
    }

    /// Makes the next pull fail with `error`.
    pub fn fail_next_pull(&self, error: PullError) {
        self.errors.lock().unwrap().push_back(error);
    }

    /// Transport ids of acknowledged messages, in order.
    pub fn acked(&self) -> Vec<String> {
        self.outcomes.acked.lock().unwrap().clone()
    }

    /// Transport ids of messages that requested redelivery, in order.
    pub fn nacked(&self) -> Vec<String> {
        self.outcomes.nacked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Puller for MemoryPuller {
    async fn pull(&self) -> Result<Option<StreamMessage>, PullError> {
        loop {
            let error = self.errors.lock().unwrap().pop_front();
            if let Some(error) = error {
                return Err(error);
            }
            let next = self.queue.lock().unwrap().pop_front();
            if let Some((id, attributes, data)) = next {
                let acker: Arc<dyn Acknowledger> = self.outcomes.clone();
                return Ok(Some(StreamMessage::new(id, attributes, data, acker)));
            }
            if !self.keep_open {
                return Ok(None);
            }
            self.pushed.notified().await;
        }
    }
}
