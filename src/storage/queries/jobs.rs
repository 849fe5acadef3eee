//! Durable job rows backing the work queue.
//!
//! The claim operation runs select-then-update inside a single
//! [`Database::with_conn`] closure; because all access shares one
//! mutex-guarded connection, two workers can never claim the same row.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::storage::database::{Database, Result};

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for its `run_at` time and a free worker.
    Pending,
    /// Claimed by exactly one in-flight execution attempt.
    Active,
    /// Handler finished successfully.
    Completed,
    /// Retries exhausted; kept for inspection.
    Failed,
}

impl JobState {
    /// The column value for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> JobState {
        match s {
            "active" => JobState::Active,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => JobState::Pending,
        }
    }
}

/// One persisted job row.
#[derive(Debug, Clone)]
pub struct JobRow {
    /// Queue-assigned job id.
    pub id: String,
    /// Job type discriminator; worker pools claim by type.
    pub job_type: String,
    /// Serialized payload.
    pub payload: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Delivery attempts made so far (incremented at claim time).
    pub attempts_made: u32,
    /// Attempt budget before the job is moved to `failed`.
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// Error recorded by the most recent failed attempt.
    pub last_error: Option<String>,
}

/// Appends a new pending job.
pub async fn insert(
    db: &Database,
    id: &str,
    job_type: &str,
    payload: &str,
    max_attempts: u32,
    backoff_base_ms: u64,
    run_at: DateTime<Utc>,
) -> Result<()> {
    let id = id.to_string();
    let job_type = job_type.to_string();
    let payload = payload.to_string();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, state, attempts_made, max_attempts,
                backoff_base_ms, run_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                id,
                job_type,
                payload,
                max_attempts,
                backoff_base_ms,
                run_at.to_rfc3339(),
                now
            ],
        )?;
        Ok(())
    })
    .await
}

/// Claims the next ready job of the given type, if any.
///
/// The returned row reflects the claim: state `active`, attempt counter
/// already incremented.
pub async fn claim_next(
    db: &Database,
    job_type: &str,
    now: DateTime<Utc>,
) -> Result<Option<JobRow>> {
    let job_type = job_type.to_string();

    db.with_conn(move |conn| {
        let now_str = now.to_rfc3339();
        let candidate = conn
            .query_row(
                &format!(
                    "{SELECT_JOB}
                     WHERE job_type = ?1 AND state = 'pending' AND run_at <= ?2
                     ORDER BY run_at, created_at
                     LIMIT 1"
                ),
                params![job_type, now_str],
                row_to_job,
            )
            .optional()?;

        let Some(mut job) = candidate else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE jobs
             SET state = 'active', attempts_made = attempts_made + 1,
                 claimed_at = ?1, updated_at = ?1
             WHERE id = ?2",
            params![now_str, job.id],
        )?;

        job.state = JobState::Active;
        job.attempts_made += 1;
        Ok(Some(job))
    })
    .await
}

/// Marks a job as successfully completed.
pub async fn mark_completed(db: &Database, id: &str) -> Result<()> {
    let id = id.to_string();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE jobs SET state = 'completed', claimed_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    })
    .await
}

/// Returns a failed attempt to the pending state, scheduled for `run_at`.
pub async fn reschedule(db: &Database, id: &str, error: &str, run_at: DateTime<Utc>) -> Result<()> {
    let id = id.to_string();
    let error = error.to_string();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE jobs
             SET state = 'pending', claimed_at = NULL, last_error = ?1,
                 run_at = ?2, updated_at = ?3
             WHERE id = ?4",
            params![error, run_at.to_rfc3339(), now, id],
        )?;
        Ok(())
    })
    .await
}

/// Moves a job to the terminal failed state.
pub async fn mark_failed(db: &Database, id: &str, error: &str) -> Result<()> {
    let id = id.to_string();
    let error = error.to_string();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE jobs
             SET state = 'failed', claimed_at = NULL, last_error = ?1, updated_at = ?2
             WHERE id = ?3",
            params![error, now, id],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves a job by id.
pub async fn get(db: &Database, id: &str) -> Result<Option<JobRow>> {
    let id = id.to_string();

    db.with_conn(move |conn| {
        let result = conn
            .query_row(
                &format!("{SELECT_JOB} WHERE id = ?1"),
                [&id],
                row_to_job,
            )
            .optional()?;
        Ok(result)
    })
    .await
}

/// Lists jobs of a type in a given state, oldest first.
pub async fn by_state(db: &Database, job_type: &str, state: JobState) -> Result<Vec<JobRow>> {
    let job_type = job_type.to_string();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "{SELECT_JOB} WHERE job_type = ?1 AND state = ?2 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![job_type, state.as_str()], row_to_job)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Counts jobs of a type in a given state.
pub async fn count_by_state(db: &Database, job_type: &str, state: JobState) -> Result<u32> {
    let job_type = job_type.to_string();

    db.with_conn(move |conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE job_type = ?1 AND state = ?2",
            params![job_type, state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
}

/// Returns every `active` job to `pending`.
///
/// Run at startup: rows left active by a crashed worker become deliverable
/// again, which is what gives the queue its at-least-once guarantee across
/// restarts.
pub async fn recover_stale_active(db: &Database) -> Result<usize> {
    db.with_conn(|conn| {
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE jobs SET state = 'pending', claimed_at = NULL, updated_at = ?1
             WHERE state = 'active'",
            [&now],
        )?;
        Ok(changed)
    })
    .await
}

const SELECT_JOB: &str = r#"
    SELECT id, job_type, payload, state, attempts_made, max_attempts,
           backoff_base_ms, last_error
    FROM jobs
"#;

fn row_to_job(row: &Row<'_>) -> std::result::Result<JobRow, rusqlite::Error> {
    let state: String = row.get(3)?;
    Ok(JobRow {
        id: row.get(0)?,
        job_type: row.get(1)?,
        payload: row.get(2)?,
        state: JobState::parse(&state),
        attempts_made: row.get(4)?,
        max_attempts: row.get(5)?,
        backoff_base_ms: row.get(6)?,
        last_error: row.get(7)?,
    })
}
