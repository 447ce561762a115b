//! Bounded fan-out of independent blocking tasks.
//!
//! [`WorkQueue::batch`] hands the caller a [`Batch`] to submit closures into.
//! Tasks run on a dedicated rayon pool of `workers` threads, start in submission
//! order, and `batch` returns only after every started task has finished. Once
//! the queue's [`CancelToken`] fires, queued tasks are dropped instead of
//! started; tasks already running are never interrupted.
//!
//! Task failures are not collected here. Tasks report through whatever shared
//! state the caller captures (see [`crate::outcome::RunOutcome`]).

use anyhow::{bail, Context, Result};
use rayon::{ScopeFifo, ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default number of concurrent tasks, sized for network fan-out rather than CPU count.
pub const DEFAULT_PARALLELISM: usize = 8;

/// Run-scoped cooperative cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Cancels the token once `timeout` elapses.
    pub fn cancel_after(&self, timeout: Duration) {
        let token = self.clone();
        thread::spawn(move || {
            thread::sleep(timeout);
            if !token.is_cancelled() {
                log::warn!("Timed out after {:?}, no new work will be started", timeout);
                token.cancel();
            }
        });
    }
}

pub struct WorkQueue {
    pool: ThreadPool,
    cancel: CancelToken,
}

impl WorkQueue {
    pub fn new(workers: usize, cancel: CancelToken) -> Result<Self> {
        // rayon reads 0 as "one thread per CPU"
        if workers == 0 {
            bail!("work queue needs at least one worker");
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("checkout-{}", index))
            .build()
            .context("Failed to start worker threads")?;
        Ok(Self { pool, cancel })
    }

    /// Runs `producer` and blocks until every task it submitted has completed
    /// or been dropped by cancellation.
    ///
    /// Tasks may borrow anything that outlives the call.
    pub fn batch<'scope, F>(&self, producer: F)
    where
        F: FnOnce(&Batch<'_, 'scope>) + Send,
    {
        let cancel = &self.cancel;
        self.pool.scope_fifo(|scope: &ScopeFifo<'scope>| {
            producer(&Batch {
                scope,
                cancel: cancel.clone(),
            });
        });
    }
}

/// Submission handle passed to the producer of [`WorkQueue::batch`].
pub struct Batch<'a, 'scope> {
    scope: &'a ScopeFifo<'scope>,
    cancel: CancelToken,
}

impl<'a, 'scope> Batch<'a, 'scope> {
    /// Queues `task` and returns immediately.
    pub fn submit<T>(&self, task: T)
    where
        T: FnOnce() + Send + 'scope,
    {
        if self.cancel.is_cancelled() {
            log::debug!("Work queue cancelled, not queueing further tasks");
            return;
        }
        let cancel = self.cancel.clone();
        self.scope.spawn_fifo(move |_| {
            if cancel.is_cancelled() {
                log::debug!("Work queue cancelled, dropping queued task");
                return;
            }
            task();
        });
    }
}
