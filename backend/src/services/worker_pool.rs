//! Worker pool for CPU-bound spreadsheet work
//!
//! Parsing, image scanning and serialization run on Tokio's blocking
//! threads. A semaphore caps how many run at once; callers beyond the limit
//! wait for a permit instead of spawning more threads.

use crate::config::{MAX_WORKER_THREADS, MIN_WORKER_THREADS};
use crate::error::{AppError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded handle for offloading blocking work
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs concurrently.
    pub fn new(size: usize) -> Result<Self> {
        if !(MIN_WORKER_THREADS..=MAX_WORKER_THREADS).contains(&size) {
            return Err(AppError::validation(
                "worker_threads",
                format!(
                    "must be between {} and {}, got {}",
                    MIN_WORKER_THREADS, MAX_WORKER_THREADS, size
                ),
            ));
        }

        tracing::debug!("Worker pool created with {} workers", size);

        Ok(Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by a running job
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a worker is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::Worker(format!("worker pool closed: {}", e)))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| {
            tracing::error!("Worker task failed: {}", e);
            AppError::Worker(e.to_string())
        })
    }
}
