//! Bounded worker pool for deferred aggregation
//!
//! N workers consume jobs from a bounded submission queue. `submit` never
//! blocks: when the queue is full it returns [`Error::QueueFull`] and the
//! caller logs and proceeds, because the durable state the job would refresh
//! is already committed. `stop` closes the queue and drains in-flight jobs.

use crate::error::{Error, Result};
use crate::models::ActionType;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Deferred aggregation job. Side-effect only; jobs do not return values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Refresh the per-bookmark social metrics aggregate
    SocialMetricsUpdate {
        bookmark_id: i64,
        action: ActionType,
    },
    /// Add the bookmark to the realtime trending sorted set
    TrendingCacheUpdate {
        bookmark_id: i64,
        action: ActionType,
    },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::SocialMetricsUpdate { .. } => "social_metrics_update",
            Job::TrendingCacheUpdate { .. } => "trending_cache_update",
        }
    }
}

/// Bounded concurrent job executor
pub struct WorkerPool {
    tx: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `workers` consumers over a queue of `queue_capacity` slots.
    /// Each job is passed to `handler`; a failed job is logged, never retried.
    pub fn start<F, Fut>(workers: usize, queue_capacity: usize, handler: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        debug!(worker_id, "worker queue closed, exiting");
                        break;
                    };

                    let kind = job.kind();
                    match handler(job).await {
                        Ok(()) => {
                            counter!("shelfmark_jobs_total", "kind" => kind, "outcome" => "ok")
                                .increment(1);
                        }
                        Err(e) => {
                            counter!("shelfmark_jobs_total", "kind" => kind, "outcome" => "error")
                                .increment(1);
                            error!(worker_id, kind, "job failed: {}", e);
                        }
                    }
                }
            }));
        }

        info!(
            "Worker pool started ({} workers, queue capacity {})",
            workers, queue_capacity
        );

        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            handles: std::sync::Mutex::new(handles),
        }
    }

    /// Enqueue a job without blocking. Returns [`Error::QueueFull`] when the
    /// queue is saturated or the pool has stopped; callers treat this as
    /// non-fatal.
    pub fn submit(&self, job: Job) -> Result<()> {
        let guard = self.tx.lock().expect("worker pool lock poisoned");
        let Some(tx) = guard.as_ref() else {
            counter!("shelfmark_jobs_rejected_total").increment(1);
            return Err(Error::QueueFull);
        };
        tx.try_send(job).map_err(|e| {
            counter!("shelfmark_jobs_rejected_total").increment(1);
            match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::QueueFull,
            }
        })
    }

    /// Close the submission queue and wait for workers to drain in-flight
    /// and queued jobs. Idempotent.
    pub async fn stop(&self) {
        info!("Stopping worker pool...");
        let tx = self.tx.lock().expect("worker pool lock poisoned").take();
        drop(tx);

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().expect("worker pool lock poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn metrics_job(bookmark_id: i64) -> Job {
        Job::SocialMetricsUpdate {
            bookmark_id,
            action: ActionType::View,
        }
    }

    #[tokio::test]
    async fn test_jobs_run_to_completion_on_stop() {
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();

        let pool = WorkerPool::start(2, 16, move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        for i in 1..=10 {
            pool.submit(metrics_job(i)).unwrap();
        }
        pool.stop().await;

        assert_eq!(executed.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_submit_fails_when_queue_full() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let held = gate.clone();

        // Single worker blocked on the gate, queue of one slot
        let pool = WorkerPool::start(1, 1, move |_job| {
            let held = held.clone();
            async move {
                let _permit = held.acquire().await.unwrap();
                Ok(())
            }
        });

        // First job occupies the worker, second fills the queue
        pool.submit(metrics_job(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.submit(metrics_job(2)).unwrap();

        let overflow = pool.submit(metrics_job(3));
        assert!(matches!(overflow, Err(Error::QueueFull)));

        gate.add_permits(16);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_rejected() {
        let pool = WorkerPool::start(1, 4, |_job| async { Ok(()) });
        pool.stop().await;
        assert!(matches!(pool.submit(metrics_job(1)), Err(Error::QueueFull)));
        // A second stop is a no-op
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_failed_jobs_do_not_stop_workers() {
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();

        let pool = WorkerPool::start(1, 16, move |job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                match job {
                    Job::SocialMetricsUpdate { bookmark_id: 1, .. } => {
                        Err(Error::database("boom"))
                    }
                    _ => Ok(()),
                }
            }
        });

        pool.submit(metrics_job(1)).unwrap();
        pool.submit(metrics_job(2)).unwrap();
        pool.stop().await;

        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }
}
