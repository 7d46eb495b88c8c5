//! Tracks spawned background tasks so their owner can wait for them.
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A registry of named background tasks sharing one shutdown signal.
///
/// This struct is responsible for:
/// - Spawning tasks and keeping track of their `JoinHandle`s.
/// - Handing out the shutdown receiver the tasks are expected to watch.
/// - Awaiting every task on shutdown and reporting panics.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    /// Creates a new `TaskManager`.
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a new task and adds its handle to the manager.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task_name = %name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Returns a clone of the shutdown receiver.
    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks spawned and not yet awaited.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for all managed tasks to complete.
    ///
    /// The caller is responsible for firing the shutdown signal first.
    pub async fn shutdown(self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!(
            "TaskManager shutting down. Waiting for {} tasks to complete...",
            handles.len()
        );

        let (names, handles): (Vec<String>, Vec<JoinHandle<()>>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut panicked = 0;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name = %name, "Task shut down gracefully."),
                Err(e) => {
                    panicked += 1;
                    error!(task_name = %name, error = %e, "Task panicked during shutdown.");
                }
            }
        }

        if panicked > 0 {
            error!("{} tasks panicked during shutdown.", panicked);
        } else {
            info!("All tasks shut down gracefully.");
        }
    }
}
