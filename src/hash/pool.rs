use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use super::{HashJob, HashOutcome, HashPool};
use crate::constants::LOW_PRIORITY_HASH_WORKERS;

/// Hash pool backed by tokio's blocking threads.
///
/// At most `workers` jobs hash at once. Low-priority jobs additionally queue
/// for a single background slot so rechecks cannot crowd out download
/// verification.
pub struct ConcurrentHasher {
    workers: Arc<Semaphore>,
    background: Arc<Semaphore>,
}

impl ConcurrentHasher {
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
            background: Arc::new(Semaphore::new(LOW_PRIORITY_HASH_WORKERS)),
        })
    }

    /// Rejects queued and future jobs as cancelled.
    pub fn close(&self) {
        self.workers.close();
        self.background.close();
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }
}

impl HashPool for ConcurrentHasher {
    fn hash(&self, job: HashJob) -> BoxFuture<'static, HashOutcome> {
        let workers = Arc::clone(&self.workers);
        let background = Arc::clone(&self.background);

        Box::pin(async move {
            let _background = if job.low_priority {
                match background.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return HashOutcome::Cancelled,
                }
            } else {
                None
            };
            let Ok(_worker) = workers.acquire_owned().await else {
                return HashOutcome::Cancelled;
            };

            let result = tokio::task::spawn_blocking(move || {
                let digest = job.digest();
                (job.buffer, digest)
            })
            .await;

            match result {
                Ok((buffer, digest)) => HashOutcome::Hashed { buffer, digest },
                Err(e) => {
                    tracing::warn!("Hash worker failed: {}", e);
                    HashOutcome::Cancelled
                }
            }
        })
    }
}
