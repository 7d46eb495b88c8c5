//! Flow control in front of a `Puller`.
//!
//! `RateLimitedPuller` runs a pool of pull workers that feed one bounded
//! channel. Delivered messages carry semaphore permits for the outstanding
//! message and byte limits until they are acked or nacked, and a shared
//! pacer caps the delivery rate independently of the transport.

use super::{Puller, StreamMessage};
use crate::config::PullerConfig;
use crate::error::ConfigError;
use crate::health::HealthFlag;
use crate::scheduler::cancelled;
use crate::task_manager::TaskManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Spaces deliveries at least `interval` apart across all workers.
struct Pacer {
    interval: Duration,
    next: Mutex<Instant>,
}

impl Pacer {
    fn new(messages_per_second: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / messages_per_second.max(1),
            next: Mutex::new(Instant::now()),
        }
    }

    async fn wait(&self) {
        let mut next = self.next.lock().await;
        let now = Instant::now();
        if *next > now {
            sleep_until(*next).await;
        }
        *next = std::cmp::max(*next, now) + self.interval;
    }
}

/// A pull subscription wrapped with concurrency, backpressure, and rate limits.
pub struct RateLimitedPuller {
    inner: Arc<dyn Puller>,
    concurrency: usize,
    max_outstanding_bytes: usize,
    message_permits: Arc<Semaphore>,
    byte_permits: Arc<Semaphore>,
    pacer: Arc<Pacer>,
    health: HealthFlag,
}

/// The running side of one `RateLimitedPuller::start` call.
pub struct PullerHandle {
    messages: async_channel::Receiver<StreamMessage>,
    task_manager: TaskManager,
}

impl PullerHandle {
    /// The channel every worker delivers into.
    ///
    /// It closes once all workers have exited.
    pub fn messages(&self) -> &async_channel::Receiver<StreamMessage> {
        &self.messages
    }

    /// Waits for the workers to exit.
    ///
    /// Messages still buffered in the channel are nacked. The cancellation
    /// signal passed to `start` must already have fired.
    pub async fn shutdown(self) {
        self.messages.close();
        while let Ok(message) = self.messages.try_recv() {
            message.nack();
        }
        self.task_manager.shutdown().await;
    }
}

impl RateLimitedPuller {
    pub fn new(inner: Arc<dyn Puller>, config: &PullerConfig) -> Result<Self, ConfigError> {
        if config.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "puller.concurrency must be at least 1".to_string(),
            ));
        }
        if config.max_messages_per_second == 0 {
            return Err(ConfigError::Invalid(
                "puller.max_messages_per_second must be at least 1".to_string(),
            ));
        }
        let max_outstanding_bytes = config.max_outstanding_bytes.min(u32::MAX as usize).max(1);
        Ok(Self {
            inner,
            concurrency: config.concurrency,
            max_outstanding_bytes,
            message_permits: Arc::new(Semaphore::new(config.max_outstanding_messages.max(1))),
            byte_permits: Arc::new(Semaphore::new(max_outstanding_bytes)),
            pacer: Arc::new(Pacer::new(config.max_messages_per_second)),
            health: HealthFlag::new("domain_event_puller"),
        })
    }

    /// Unhealthy once the underlying subscription reported it is closed.
    pub fn health(&self) -> HealthFlag {
        self.health.clone()
    }

    /// Starts the pull workers.
    ///
    /// Workers stop pulling once `cancel` fires or the subscription closes.
    pub fn start(&self, cancel: watch::Receiver<bool>) -> PullerHandle {
        let (tx, rx) = async_channel::bounded(self.concurrency);
        let task_manager = TaskManager::new(cancel);

        for worker_id in 0..self.concurrency {
            let worker = Worker {
                id: worker_id,
                inner: self.inner.clone(),
                max_outstanding_bytes: self.max_outstanding_bytes,
                message_permits: self.message_permits.clone(),
                byte_permits: self.byte_permits.clone(),
                pacer: self.pacer.clone(),
                health: self.health.clone(),
                tx: tx.clone(),
            };
            let cancel = task_manager.get_shutdown_rx();
            task_manager.spawn(format!("puller-worker-{worker_id}"), worker.run(cancel));
        }
        debug!(workers = self.concurrency, "Pull workers started");

        PullerHandle {
            messages: rx,
            task_manager,
        }
    }
}

struct Worker {
    id: usize,
    inner: Arc<dyn Puller>,
    max_outstanding_bytes: usize,
    message_permits: Arc<Semaphore>,
    byte_permits: Arc<Semaphore>,
    pacer: Arc<Pacer>,
    health: HealthFlag,
    tx: async_channel::Sender<StreamMessage>,
}

impl Worker {
    async fn run(self, mut cancel: watch::Receiver<bool>) {
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        loop {
            let message_permit = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                permit = self.message_permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pulled = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                pulled = self.inner.pull() => pulled,
            };
            let mut message = match pulled {
                Ok(Some(message)) => {
                    backoff_ms = INITIAL_BACKOFF_MS;
                    self.health.set_healthy(true);
                    message
                }
                Ok(None) => {
                    info!(worker = self.id, "Subscription closed");
                    self.health.set_healthy(false);
                    break;
                }
                Err(e) => {
                    warn!(worker = self.id, error = %e, backoff_ms, "Pull failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => break,
                        _ = sleep(Duration::from_millis(backoff_ms)) => {}
                    }
                    backoff_ms = std::cmp::min(backoff_ms * 2, MAX_BACKOFF_MS);
                    continue;
                }
            };

            // Oversized messages take the whole byte budget rather than block forever.
            let bytes = message.size().clamp(1, self.max_outstanding_bytes) as u32;
            let byte_permit = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                permit = self.byte_permits.clone().acquire_many_owned(bytes) => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            message.attach_permits([message_permit, byte_permit]);

            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                _ = self.pacer.wait() => {}
            }

            if self.tx.send(message).await.is_err() {
                debug!(worker = self.id, "Message channel closed");
                break;
            }
        }
        debug!(worker = self.id, "Pull worker exiting");
    }
}
