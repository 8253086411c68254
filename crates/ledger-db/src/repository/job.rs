//! # Job Queue Repository
//!
//! Persistent queue behind the job scheduler adapter.
//!
//! ## Job Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue() ──► queued ──claim_next()──► running ──mark_done()──► done  │
//! │                  ▲                         │                            │
//! │                  │      reschedule()       │                            │
//! │                  └─────(transient error)───┤                            │
//! │                                            │  mark_failed()             │
//! │                                            └──────────────────► failed │
//! │                                                                         │
//! │  claim_next() flips exactly one ready row to `running` in a single     │
//! │  UPDATE ... RETURNING, so two workers never run the same job.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A row of `sync_jobs`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SyncJob {
    pub id: String,
    pub job_name: String,
    /// JSON object.
    pub payload: String,
    pub queue: String,
    pub timeout_secs: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub run_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(0) as u64)
    }

    pub fn payload_json(&self) -> DbResult<serde_json::Value> {
        serde_json::from_str(&self.payload).map_err(|e| DbError::serialization("sync_jobs.payload", e))
    }
}

/// Work item handed to [`JobRepository::enqueue`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_name: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub timeout: Duration,
}

const SELECT_JOB: &str = r#"
    SELECT
        id, job_name, payload, queue, timeout_secs, status, attempts,
        last_error, run_after, created_at, started_at, finished_at
    FROM sync_jobs
"#;

/// Repository for the job queue.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    /// Creates a new JobRepository.
    pub fn new(pool: SqlitePool) -> Self {
        JobRepository { pool }
    }

    /// Queues a job to run as soon as a worker is free.
    pub async fn enqueue(&self, job: &NewJob) -> DbResult<SyncJob> {
        let now = Utc::now();
        let entry = SyncJob {
            id: Uuid::new_v4().to_string(),
            job_name: job.job_name.clone(),
            payload: job.payload.to_string(),
            queue: job.queue.clone(),
            timeout_secs: job.timeout.as_secs() as i64,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            run_after: now,
            created_at: now,
            started_at: None,
            finished_at: None,
        };

        debug!(
            job_id = %entry.id,
            job_name = %entry.job_name,
            queue = %entry.queue,
            "Queuing job"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, job_name, payload, queue, timeout_secs, status, attempts,
                last_error, run_after, created_at, started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.job_name)
        .bind(&entry.payload)
        .bind(&entry.queue)
        .bind(entry.timeout_secs)
        .bind(entry.status)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.run_after)
        .bind(entry.created_at)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// A queued or running job with the same name and payload, if any.
    pub async fn find_open(&self, job_name: &str, payload: &serde_json::Value) -> DbResult<Option<SyncJob>> {
        let sql = format!(
            "{} WHERE job_name = ?1 AND payload = ?2 AND status IN ('queued', 'running') LIMIT 1",
            SELECT_JOB
        );
        let job: Option<SyncJob> = sqlx::query_as(&sql)
            .bind(job_name)
            .bind(payload.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Claims the oldest ready job, marking it running and counting the
    /// attempt.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> DbResult<Option<SyncJob>> {
        let job: Option<SyncJob> = sqlx::query_as(
            r#"
            UPDATE sync_jobs SET
                status = 'running',
                attempts = attempts + 1,
                started_at = ?1
            WHERE id = (
                SELECT id FROM sync_jobs
                WHERE status = 'queued' AND run_after <= ?1
                ORDER BY run_after ASC, created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING
                id, job_name, payload, queue, timeout_secs, status, attempts,
                last_error, run_after, created_at, started_at, finished_at
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Marks a job as finished successfully.
    pub async fn mark_done(&self, id: &str) -> DbResult<()> {
        self.finish(id, JobStatus::Done, None).await
    }

    /// Marks a job as permanently failed.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        self.finish(id, JobStatus::Failed, Some(error)).await
    }

    async fn finish(&self, id: &str, status: JobStatus, error: Option<&str>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs SET
                status = ?2,
                last_error = COALESCE(?3, last_error),
                finished_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Job", id));
        }
        Ok(())
    }

    /// Puts a job back in the queue after a transient failure.
    pub async fn reschedule(&self, id: &str, error: &str, run_after: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs SET
                status = 'queued',
                last_error = ?2,
                run_after = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(run_after)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Job", id));
        }
        Ok(())
    }

    /// Gets a job by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncJob>> {
        let sql = format!("{} WHERE id = ?1", SELECT_JOB);
        let job: Option<SyncJob> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Counts jobs in a state.
    pub async fn count_by_status(&self, status: JobStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_jobs WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Returns jobs left `running` by a worker that died, back to `queued`.
    pub async fn requeue_stale_running(&self) -> DbResult<u64> {
        let result = sqlx::query("UPDATE sync_jobs SET status = 'queued' WHERE status = 'running'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;

    fn details_job(id: &str) -> NewJob {
        NewJob {
            job_name: "sync_details".into(),
            payload: json!({ "local_id": id }),
            queue: "short".into(),
            timeout: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn test_claim_runs_each_job_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.jobs();
        let queued = repo.enqueue(&details_job("alice")).await.unwrap();

        let claimed = repo.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, queued.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.payload_json().unwrap()["local_id"], "alice");

        assert!(repo.claim_next(Utc::now()).await.unwrap().is_none());

        repo.mark_done(&claimed.id).await.unwrap();
        assert_eq!(repo.count_by_status(JobStatus::Done).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reschedule_delays_next_claim() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.jobs();
        repo.enqueue(&details_job("alice")).await.unwrap();

        let claimed = repo.claim_next(Utc::now()).await.unwrap().unwrap();
        let later = Utc::now() + chrono::Duration::seconds(60);
        repo.reschedule(&claimed.id, "timed out", later).await.unwrap();

        assert!(repo.claim_next(Utc::now()).await.unwrap().is_none());
        let again = repo
            .claim_next(later + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.last_error.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn test_find_open_dedupes_by_payload() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.jobs();
        let job = details_job("alice");
        repo.enqueue(&job).await.unwrap();

        assert!(repo.find_open(&job.job_name, &job.payload).await.unwrap().is_some());
        assert!(repo
            .find_open(&job.job_name, &json!({ "local_id": "bob" }))
            .await
            .unwrap()
            .is_none());
    }
}
