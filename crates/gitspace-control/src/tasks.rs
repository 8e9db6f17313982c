//! Bounded runner for background work spawned by actions.
//!
//! Every task holds a semaphore permit while it runs and observes the shared
//! shutdown token, so a stopping process cancels in-flight orchestration instead
//! of leaving it detached.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Spawns background tasks with bounded concurrency and cooperative cancellation.
#[derive(Clone)]
pub struct BackgroundTasks {
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl BackgroundTasks {
    /// Create a runner allowing `max_concurrency` tasks at once.
    #[must_use]
    pub fn new(max_concurrency: usize, shutdown: CancellationToken) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn a named task. It waits for a permit and is dropped on shutdown.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            let permit = tokio::select! {
                () = shutdown.cancelled() => {
                    warn!(task = name, "Background task cancelled before start");
                    return;
                }
                permit = semaphore.acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                warn!(task = name, "Background task semaphore closed");
                return;
            };

            tokio::select! {
                () = shutdown.cancelled() => {
                    warn!(task = name, "Background task cancelled by shutdown");
                }
                () = task => {
                    debug!(task = name, "Background task finished");
                }
            }
        });
    }

    /// Wait until every task spawned so far has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Token observed by every task.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel all tasks and wait for them to unwind.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Number of tasks still running or waiting for a permit.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Whether no task is running or waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }
}
