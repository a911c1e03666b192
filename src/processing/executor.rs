//! Shared worker pool for fanned-out processing work

use crate::error::{Error, ProcessingFailure, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// Minimum number of worker threads
pub const MIN_WORKER_THREADS: usize = 3;

/// Rayon thread pool that refuses work once shut down
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
    shut_down: AtomicBool,
}

impl WorkerPool {
    /// Number of threads used when none is configured
    pub fn default_size() -> usize {
        num_cpus::get().max(MIN_WORKER_THREADS)
    }

    /// Create a pool with `threads` workers named `<prefix>-<n>`
    pub fn new(threads: usize, thread_name_prefix: &str) -> Result<Self> {
        let prefix = thread_name_prefix.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .panic_handler(|payload| {
                let failure = ProcessingFailure::from_panic(payload);
                error!(error = %failure, "Worker task panicked");
            })
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build worker pool: {}", e)))?;

        Ok(Self {
            pool,
            threads,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Create a pool of [`WorkerPool::default_size`] threads
    pub fn with_default_size() -> Result<Self> {
        Self::new(Self::default_size(), "datamining-worker")
    }

    /// Submit a task
    ///
    /// Fails with [`ProcessingFailure::Rejected`] after [`WorkerPool::shutdown`].
    pub fn spawn<F>(&self, task: F) -> std::result::Result<(), ProcessingFailure>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(ProcessingFailure::Rejected(
                "worker pool has been shut down".to_string(),
            ));
        }
        self.pool.spawn(task);
        Ok(())
    }

    /// Refuse all further tasks; queued tasks still run
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    /// Whether the pool refuses tasks
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Counts the outstanding tasks of one processor
#[derive(Debug, Default)]
pub struct TaskTracker {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl TaskTracker {
    /// Create a tracker without pending tasks
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a task; it is done when the guard drops
    pub fn begin(self: &Arc<Self>) -> TaskGuard {
        *self.pending.lock() += 1;
        TaskGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Number of outstanding tasks
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until no task is outstanding or `aborted` is set
    pub fn wait_until_idle(&self, aborted: &AtomicBool) -> std::result::Result<(), ProcessingFailure> {
        let mut pending = self.pending.lock();
        loop {
            if aborted.load(Ordering::SeqCst) {
                return Err(ProcessingFailure::Interrupted);
            }
            if *pending == 0 {
                return Ok(());
            }
            self.idle.wait(&mut pending);
        }
    }

    /// Wake waiters so they re-check the abort flag
    pub fn wake_all(&self) {
        let _pending = self.pending.lock();
        self.idle.notify_all();
    }

    fn done(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Marks one task of a [`TaskTracker`] as outstanding until dropped
#[derive(Debug)]
pub struct TaskGuard {
    tracker: Arc<TaskTracker>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tracker.done();
    }
}
