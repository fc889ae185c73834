//! Repository worker pool: offloads CPU-bound work (JSON canonicalization,
//! diff computation over large trees) off the async runtime's reactor
//! threads, mirroring the pack decoder's `Arc<ThreadPool>` (§`internal::pack::mod::Pack::pool`).

use std::sync::Arc;

use threadpool::ThreadPool;
use tokio::sync::oneshot;

/// A bounded pool of OS threads for blocking, CPU-bound closures.
/// `num_repository_workers` (spec.md §6) sizes it; defaults to the
/// number of logical CPUs the way the pack decoder does.
#[derive(Clone)]
pub struct RepositoryWorkerPool {
    pool: Arc<ThreadPool>,
}

impl RepositoryWorkerPool {
    pub fn new(num_workers: usize) -> Self {
        let workers = if num_workers == 0 { num_cpus::get() } else { num_workers };
        RepositoryWorkerPool {
            pool: Arc::new(ThreadPool::new(workers)),
        }
    }

    /// Run `f` on the pool and await its result without blocking the
    /// calling task.
    pub async fn spawn<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.execute(move || {
            let _ = tx.send(f());
        });
        rx.await.expect("worker pool task panicked before sending its result")
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    pub fn queued_count(&self) -> usize {
        self.pool.queued_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_runs_closure_and_returns_its_result() {
        let pool = RepositoryWorkerPool::new(2);
        let result = pool.spawn(|| 2 + 2).await;
        assert_eq!(result, 4);
    }
}
