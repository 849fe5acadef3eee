//! Durable, at-least-once job queue.
//!
//! Jobs are rows in SQLite: they survive restarts between enqueue and
//! claim, and a crash mid-attempt is recovered by [`JobQueue::recover`] at
//! startup. Delivery is at-least-once; handlers must be idempotent.
//!
//! Failed attempts are rescheduled with exponential backoff until the
//! attempt budget is spent, after which the job lands in a terminal
//! `failed` state where it stays inspectable.

mod job;
mod worker;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::database::{Database, DatabaseError};
use crate::storage::queries::jobs;

pub use crate::storage::queries::jobs::{JobRow, JobState};
pub use job::{job_types, JobPayload};
pub use worker::{JobHandler, WorkerPool};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("job payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Retry configuration attached to a job at enqueue time.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempt budget (first delivery included).
    pub max_attempts: u32,
    /// Base delay; attempt `n` is retried after `base * 2^(n-1)`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// A claimed job, owned by exactly one in-flight execution attempt.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Queue-assigned id.
    pub id: String,
    /// Decoded payload.
    pub payload: JobPayload,
    /// Which attempt this is, 1-based.
    pub attempt: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    backoff_base_ms: u64,
}

/// What [`JobQueue::fail`] decided to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Rescheduled; claimable again after the delay.
    Retried {
        /// Backoff applied before redelivery.
        delay: Duration,
    },
    /// Attempt budget spent; moved to the terminal failed state.
    Dead,
}

/// Handle to the durable job queue.
///
/// Cheap to clone; clones share the backing database.
#[derive(Debug, Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    /// Creates a queue over the given database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends a job, immediately claimable.
    pub async fn enqueue(&self, payload: &JobPayload, policy: RetryPolicy) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let encoded = serde_json::to_string(payload)?;

        jobs::insert(
            &self.db,
            &id,
            payload.job_type(),
            &encoded,
            policy.max_attempts.max(1),
            policy.base_delay.as_millis() as u64,
            Utc::now(),
        )
        .await?;

        tracing::debug!(job_id = %id, job_type = payload.job_type(), "enqueued job");
        Ok(id)
    }

    /// Claims the next ready job of a type, if any.
    pub async fn claim(&self, job_type: &str) -> Result<Option<ClaimedJob>> {
        self.claim_at(job_type, Utc::now()).await
    }

    /// Claims against an explicit clock. Exposed so tests can step time
    /// through backoff schedules deterministically.
    pub async fn claim_at(
        &self,
        job_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimedJob>> {
        let Some(row) = jobs::claim_next(&self.db, job_type, now).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&row.payload) {
            Ok(payload) => Ok(Some(ClaimedJob {
                id: row.id,
                payload,
                attempt: row.attempts_made,
                max_attempts: row.max_attempts,
                backoff_base_ms: row.backoff_base_ms,
            })),
            Err(e) => {
                // A payload this process cannot decode will never succeed;
                // dead-letter it instead of burning retries.
                tracing::error!(job_id = %row.id, error = %e, "undecodable job payload");
                jobs::mark_failed(&self.db, &row.id, &format!("undecodable payload: {e}"))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Acknowledges successful completion.
    pub async fn complete(&self, job: &ClaimedJob) -> Result<()> {
        jobs::mark_completed(&self.db, &job.id).await?;
        Ok(())
    }

    /// Records a failed attempt: reschedules with exponential backoff, or
    /// moves the job to the failed state once the budget is spent.
    pub async fn fail(&self, job: &ClaimedJob, error: &str) -> Result<FailureDisposition> {
        if job.attempt >= job.max_attempts {
            jobs::mark_failed(&self.db, &job.id, error).await?;
            return Ok(FailureDisposition::Dead);
        }

        let exponent = job.attempt.saturating_sub(1).min(16);
        let delay = Duration::from_millis(job.backoff_base_ms.saturating_mul(1 << exponent));
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(2));

        jobs::reschedule(&self.db, &job.id, error, run_at).await?;
        Ok(FailureDisposition::Retried { delay })
    }

    /// Returns crashed-worker leftovers (`active` rows) to `pending`.
    /// Call once at startup before spawning workers.
    pub async fn recover(&self) -> Result<usize> {
        let recovered = jobs::recover_stale_active(&self.db).await?;
        if recovered > 0 {
            tracing::info!(count = recovered, "recovered in-flight jobs from previous run");
        }
        Ok(recovered)
    }

    /// Lists dead jobs of a type for inspection.
    pub async fn failed_jobs(&self, job_type: &str) -> Result<Vec<JobRow>> {
        Ok(jobs::by_state(&self.db, job_type, JobState::Failed).await?)
    }

    /// Counts jobs of a type in a state.
    pub async fn count(&self, job_type: &str, state: JobState) -> Result<u32> {
        Ok(jobs::count_by_state(&self.db, job_type, state).await?)
    }
}
