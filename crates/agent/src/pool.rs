//! Bounded task pool.
//!
//! A thin wrapper over `Arc<Semaphore>` + `tokio::spawn`. Submitted
//! futures start immediately as tasks but wait for a permit before doing
//! any work, so at most `limit` of them run at once. Clones share the
//! same permits.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    permits: Option<Arc<Semaphore>>,
}

impl WorkerPool {
    /// At most `limit` submitted futures run concurrently.
    ///
    /// A zero limit is rejected by the callers' configuration checks; here
    /// it is treated as one so submissions can never deadlock.
    pub fn bounded(limit: usize) -> Self {
        Self {
            permits: Some(Arc::new(Semaphore::new(limit.max(1)))),
        }
    }

    /// Every submitted future runs as soon as it is spawned.
    pub fn unbounded() -> Self {
        Self { permits: None }
    }

    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map_or_else(Self::unbounded, Self::bounded)
    }

    /// Permits currently free, or `None` for an unbounded pool.
    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }

    /// Spawn `future` as a task that holds a permit while it runs.
    pub fn submit<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only fails if
            // that invariant breaks; run unthrottled rather than drop work.
            let _permit = match permits {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            future.await
        })
    }
}
