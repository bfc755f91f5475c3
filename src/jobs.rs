use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::warn;

/// Tracks detached background jobs so shutdown can wait for them, bounded
/// by a deadline. Jobs run on the runtime the tracker was created on, which
/// outlives the worker threads serving requests.
#[derive(Clone)]
pub struct JobTracker {
    runtime: tokio::runtime::Handle,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl JobTracker {
    /// Must be called from within the runtime the jobs should run on.
    pub fn new() -> Self {
        Self {
            runtime: tokio::runtime::Handle::current(),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn a tracked job, pruning handles that already finished.
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().unwrap();
        handles.retain(|h| !h.is_finished());
        handles.push(self.runtime.spawn(job));
    }

    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait for outstanding jobs, giving up after `deadline`. Job panics are
    /// swallowed; a job that never finishes only costs the deadline.
    pub async fn drain(&self, deadline: Duration) {
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().unwrap());
        if handles.is_empty() {
            return;
        }
        let count = handles.len();
        if tokio::time::timeout(deadline, join_all(handles)).await.is_err() {
            warn!("gave up waiting for {count} background job(s) after {deadline:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_waits_for_spawned_jobs() {
        let tracker = JobTracker::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            tracker.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tracker.drain(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn drain_gives_up_after_deadline() {
        let tracker = JobTracker::new();
        tracker.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let started = std::time::Instant::now();
        tracker.drain(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
