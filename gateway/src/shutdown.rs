//! Shutdown coordinator: process-wide terminate signal plus task accounting
//!
//! The terminate signal is broadcast, not consumed: every session loop
//! watches it and treats it like a kick. Session tasks are spawned through
//! the coordinator so `wait` can block until each of them has released its
//! socket and backend stream.

use log::info;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    terminate: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task that `wait` will account for
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Fires the terminate signal; repeated calls have no further effect
    pub fn trigger(&self) {
        if !self.terminate.is_cancelled() {
            info!("terminate signal raised, draining {} tasks", self.tracker.len());
        }
        self.terminate.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves once the terminate signal fired
    pub async fn terminated(&self) {
        self.terminate.cancelled().await
    }

    /// Outstanding tracked tasks
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Blocks until every tracked task finished.
    ///
    /// Tasks spawned after this call starts are still waited for, as long
    /// as one tracked task is alive to spawn them.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_double_trigger_closes_each_task_once() {
        let shutdown = ShutdownCoordinator::new();
        let closed = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let shutdown_task = shutdown.clone();
            let closed = Arc::clone(&closed);
            shutdown.spawn(async move {
                shutdown_task.terminated().await;
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(shutdown.outstanding(), 4);

        shutdown.trigger();
        shutdown.trigger();
        shutdown.wait().await;

        assert_eq!(closed.load(Ordering::SeqCst), 4);
        assert_eq!(shutdown.outstanding(), 0);
        assert!(shutdown.is_triggered());

        // a third trigger after the drain is still harmless
        shutdown.trigger();
        assert_eq!(closed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_tasks_finish() {
        let shutdown = ShutdownCoordinator::new();
        let done = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&done);
        shutdown.spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(1, Ordering::SeqCst);
        });

        shutdown.trigger();
        shutdown.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_without_tasks_returns() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.trigger();
        tokio_test::assert_ready!(tokio_test::task::spawn(shutdown.wait()).poll());
    }
}
