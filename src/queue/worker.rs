//! Worker pools: per-job-type concurrent claim loops.
//!
//! Each pool owns a fixed number of tokio tasks that claim and execute jobs
//! of a single type. Acknowledgment happens only after the handler returns,
//! so a crash mid-handler leaves the row claimable again after recovery:
//! at-least-once semantics, by construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::{FailureDisposition, JobPayload, JobQueue};

/// Executes one job payload.
///
/// Handlers must be idempotent: the queue may deliver the same payload more
/// than once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Processes the payload. `Err` triggers the job's retry policy.
    async fn handle(&self, payload: &JobPayload) -> anyhow::Result<()>;
}

/// A pool of workers bound to one job type.
pub struct WorkerPool {
    job_type: &'static str,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `concurrency` workers claiming jobs of `job_type`.
    ///
    /// `idle_poll` is how long a worker sleeps when the queue is empty.
    pub fn spawn(
        queue: JobQueue,
        job_type: &'static str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
        idle_poll: Duration,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let handles = (0..concurrency.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    queue.clone(),
                    job_type,
                    Arc::clone(&handler),
                    Arc::clone(&shutdown),
                    idle_poll,
                    worker,
                ))
            })
            .collect();

        tracing::info!(job_type, concurrency = concurrency.max(1), "worker pool started");

        Self {
            job_type,
            shutdown,
            handles,
        }
    }

    /// Signals all workers to stop and waits for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!(job_type = self.job_type, "worker pool stopped");
    }
}

async fn worker_loop(
    queue: JobQueue,
    job_type: &'static str,
    handler: Arc<dyn JobHandler>,
    shutdown: Arc<AtomicBool>,
    idle_poll: Duration,
    worker: usize,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match queue.claim(job_type).await {
            Ok(Some(job)) => {
                tracing::debug!(job_type, worker, job_id = %job.id, attempt = job.attempt,
                    "executing job");

                match handler.handle(&job.payload).await {
                    Ok(()) => {
                        if let Err(e) = queue.complete(&job).await {
                            tracing::error!(job_id = %job.id, error = %e,
                                "failed to acknowledge completed job");
                        }
                    }
                    Err(e) => match queue.fail(&job, &e.to_string()).await {
                        Ok(FailureDisposition::Retried { delay }) => {
                            tracing::warn!(job_id = %job.id, attempt = job.attempt,
                                delay_ms = delay.as_millis() as u64, error = %e,
                                "job failed, retry scheduled");
                        }
                        Ok(FailureDisposition::Dead) => {
                            tracing::error!(job_id = %job.id, attempt = job.attempt, error = %e,
                                "job failed permanently");
                        }
                        Err(queue_err) => {
                            tracing::error!(job_id = %job.id, error = %queue_err,
                                "failed to record job failure");
                        }
                    },
                }
            }
            Ok(None) => tokio::time::sleep(idle_poll).await,
            Err(e) => {
                tracing::error!(job_type, error = %e, "claim failed");
                tokio::time::sleep(idle_poll).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountKey, ProviderMessageId};
    use crate::queue::{job_types, JobState, RetryPolicy};
    use crate::storage::database::Database;
    use std::sync::atomic::AtomicUsize;

    /// Handler that fails a configurable number of times, then succeeds.
    struct FlakyHandler {
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _payload: &JobPayload) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("simulated failure {call}");
            }
            Ok(())
        }
    }

    fn payload(id: &str) -> JobPayload {
        JobPayload::ProcessNewMessage {
            account: AccountKey::google("a1"),
            message_id: ProviderMessageId::from(id),
        }
    }

    async fn wait_for_state(queue: &JobQueue, job_type: &str, state: JobState) {
        for _ in 0..200 {
            if queue.count(job_type, state).await.unwrap() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for a {state:?} job");
    }

    #[tokio::test]
    async fn pool_processes_enqueued_job() {
        let queue = JobQueue::new(Database::open_in_memory().await.unwrap());
        let handler = Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            failures: 0,
        });

        queue.enqueue(&payload("m1"), RetryPolicy::default()).await.unwrap();

        let pool = WorkerPool::spawn(
            queue.clone(),
            job_types::PROCESS_NEW_MESSAGE,
            2,
            handler.clone(),
            Duration::from_millis(10),
        );

        wait_for_state(&queue, job_types::PROCESS_NEW_MESSAGE, JobState::Completed).await;
        pool.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_job_is_retried_until_it_succeeds() {
        let queue = JobQueue::new(Database::open_in_memory().await.unwrap());
        let handler = Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            failures: 2,
        });

        queue
            .enqueue(
                &payload("m1"),
                RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(5),
                },
            )
            .await
            .unwrap();

        let pool = WorkerPool::spawn(
            queue.clone(),
            job_types::PROCESS_NEW_MESSAGE,
            1,
            handler.clone(),
            Duration::from_millis(5),
        );

        wait_for_state(&queue, job_types::PROCESS_NEW_MESSAGE, JobState::Completed).await;
        pool.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_job_lands_in_failed_state() {
        let queue = JobQueue::new(Database::open_in_memory().await.unwrap());
        let handler = Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
        });

        queue
            .enqueue(
                &payload("m1"),
                RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(5),
                },
            )
            .await
            .unwrap();

        let pool = WorkerPool::spawn(
            queue.clone(),
            job_types::PROCESS_NEW_MESSAGE,
            1,
            handler.clone(),
            Duration::from_millis(5),
        );

        wait_for_state(&queue, job_types::PROCESS_NEW_MESSAGE, JobState::Failed).await;
        pool.shutdown().await;

        let failed = queue
            .failed_jobs(job_types::PROCESS_NEW_MESSAGE)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("simulated failure"));
    }

    #[tokio::test]
    async fn a_stalled_pool_does_not_block_other_job_types() {
        let queue = JobQueue::new(Database::open_in_memory().await.unwrap());

        // No pool for process jobs at all: the unsubscribe pool must still
        // drain its own partition.
        queue.enqueue(&payload("stuck"), RetryPolicy::default()).await.unwrap();
        queue
            .enqueue(
                &JobPayload::Unsubscribe {
                    message_id: ProviderMessageId::from("m2"),
                    user_id: "u1".into(),
                },
                RetryPolicy::default(),
            )
            .await
            .unwrap();

        let handler = Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            failures: 0,
        });
        let pool = WorkerPool::spawn(
            queue.clone(),
            job_types::UNSUBSCRIBE,
            1,
            handler,
            Duration::from_millis(10),
        );

        wait_for_state(&queue, job_types::UNSUBSCRIBE, JobState::Completed).await;
        pool.shutdown().await;

        assert_eq!(
            queue
                .count(job_types::PROCESS_NEW_MESSAGE, JobState::Pending)
                .await
                .unwrap(),
            1
        );
    }
}
