//! Bounded blocking worker pool and activity tracking.

use crate::error::{SyncError, SyncResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// Runs encode/decode work and blocking local I/O off the async threads.
///
/// At most `size` jobs run at once; further jobs wait for a permit.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool running at most `size` jobs concurrently.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `job` on a blocking thread.
    ///
    /// # Errors
    ///
    /// Returns `ShutDown` if the pool was closed, `Worker` if the job panicked.
    pub async fn run<F, R>(&self, job: F) -> SyncResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SyncError::ShutDown)?;
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))
    }

    /// Rejects all jobs that have not started yet.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Counts outstanding engine work so callers can wait for quiescence.
#[derive(Debug, Clone, Default)]
pub(crate) struct Activity {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Activity {
    pub(crate) fn enter(&self) -> ActivityGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            count: Arc::clone(&self.count),
            idle: Arc::clone(&self.idle),
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.count.load(Ordering::SeqCst) == 0
    }

    /// Resolves once no guard is alive.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the activity count when dropped.
#[derive(Debug)]
pub(crate) struct ActivityGuard {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_jobs() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.run(|| 21 * 2).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn bounded_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn closed_pool_rejects() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(matches!(pool.run(|| ()).await, Err(SyncError::ShutDown)));
    }

    #[test]
    fn activity_guard() {
        let activity = Activity::default();
        assert!(activity.is_idle());
        let guard = activity.enter();
        let second = activity.enter();
        assert!(!activity.is_idle());
        drop(guard);
        drop(second);
        assert!(activity.is_idle());
    }

    #[tokio::test]
    async fn wait_idle_wakes_when_last_guard_drops() {
        let activity = Activity::default();
        activity.wait_idle().await;

        let outer = activity.enter();
        let inner = activity.enter();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(inner);
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(outer);
        });

        tokio::time::timeout(Duration::from_secs(2), activity.wait_idle())
            .await
            .unwrap();
        assert!(activity.is_idle());
        task.await.unwrap();
    }
}
