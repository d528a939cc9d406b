//! Fixed-size worker pool for inbound requests.

use parking_lot::Mutex;
use std::fmt;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::{Result, TransportError};

/// A named runtime whose blocking pool runs at most `thread_count` request
/// handlers at once. Extra jobs queue until a worker frees up.
pub struct WorkerPool {
    name: String,
    thread_count: usize,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl WorkerPool {
    /// Starts a pool.
    pub fn new(name: &str, thread_count: usize) -> Result<Self> {
        if thread_count == 0 {
            return Err(TransportError::InvalidConfig(
                "thread_count must be at least 1".into(),
            ));
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(thread_count)
            .thread_name(format!("{name}-worker"))
            .enable_all()
            .build()?;
        debug!(name, thread_count, "Worker pool started");
        Ok(Self {
            name: name.to_string(),
            thread_count,
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
        })
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum concurrent jobs.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Runtime handle, for I/O tasks that feed the pool.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Returns false once shut down.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Queues a blocking job. Jobs submitted after shutdown are dropped.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if !self.is_running() {
            debug!(name = %self.name, "Dropping job submitted after shutdown");
            return;
        }
        self.handle.spawn_blocking(job);
    }

    /// Stops the pool without waiting for running jobs.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            debug!(name = %self.name, "Worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("thread_count", &self.thread_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(
            WorkerPool::new("empty", 0),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn concurrency_is_capped() {
        let pool = WorkerPool::new("capped", 2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            pool.execute(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            });
        }
        for _ in 0..6 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn jobs_after_shutdown_are_dropped() {
        let pool = WorkerPool::new("closed", 1).unwrap();
        pool.shutdown();
        assert!(!pool.is_running());
        let (tx, rx) = mpsc::channel::<()>();
        pool.execute(move || {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
