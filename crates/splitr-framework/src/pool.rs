//! Bounded worker pool.
//!
//! Every inbound envelope is processed in its own task, but at most
//! `max_concurrency` of them run at once. [`WorkerPool::spawn`] waits for a
//! free permit before spawning, which pushes back on whoever is feeding the
//! pool (usually a broker listener) instead of letting tasks pile up.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::PoolClosed;

/// Default number of concurrently running dispatches.
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

/// A semaphore-bounded task spawner.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max: usize,
}

impl WorkerPool {
    /// Creates a pool running at most `max` tasks at once (at least one).
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits for a free slot, then spawns `task` on it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolClosed`] once [`close`](Self::close) has been called.
    pub async fn spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>, PoolClosed>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed)?;
        Ok(tokio::spawn(async move {
            let _permit = permit;
            task.await
        }))
    }

    /// Stops accepting new work. Running tasks finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Maximum number of concurrent tasks.
    pub fn max_concurrency(&self) -> usize {
        self.max
    }

    /// Number of tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max - self.permits.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}
