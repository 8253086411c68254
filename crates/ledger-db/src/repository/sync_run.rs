//! # Sync Run Repository
//!
//! Progress rows for long bulk runs. The bulk detail reconciler opens a run,
//! checkpoints every N records and closes it with the final counts, so a
//! killed job still leaves a trace of how far it got.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithFailures,
}

/// A row of `sync_runs`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SyncRun {
    pub id: String,
    pub kind: String,
    pub status: RunStatus,
    pub total: i64,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub last_local_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub checkpoint_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counters written at a checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
}

const SELECT_RUN: &str = r#"
    SELECT
        id, kind, status, total, processed, succeeded, failed, last_local_id,
        started_at, checkpoint_at, finished_at
    FROM sync_runs
"#;

#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    pool: SqlitePool,
}

impl SyncRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncRunRepository { pool }
    }

    /// Opens a run.
    pub async fn start(&self, kind: &str, total: i64) -> DbResult<SyncRun> {
        let run = SyncRun {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            status: RunStatus::Running,
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            last_local_id: None,
            started_at: Utc::now(),
            checkpoint_at: None,
            finished_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, kind, status, total, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&run.id)
        .bind(&run.kind)
        .bind(run.status)
        .bind(run.total)
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    /// Records progress so far.
    pub async fn checkpoint(&self, id: &str, progress: RunProgress, last_local_id: Option<&str>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                processed = ?2,
                succeeded = ?3,
                failed = ?4,
                last_local_id = ?5,
                checkpoint_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(progress.processed)
        .bind(progress.succeeded)
        .bind(progress.failed)
        .bind(last_local_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sync run", id));
        }
        Ok(())
    }

    /// Closes a run with its final counts.
    pub async fn finish(&self, id: &str, progress: RunProgress) -> DbResult<RunStatus> {
        let status = if progress.failed > 0 {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?2,
                processed = ?3,
                succeeded = ?4,
                failed = ?5,
                checkpoint_at = ?6,
                finished_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(progress.processed)
        .bind(progress.succeeded)
        .bind(progress.failed)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sync run", id));
        }
        Ok(status)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<SyncRun>> {
        let sql = format!("{} WHERE id = ?1", SELECT_RUN);
        let run: Option<SyncRun> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    /// Most recently started run of a kind.
    pub async fn latest(&self, kind: &str) -> DbResult<Option<SyncRun>> {
        let sql = format!("{} WHERE kind = ?1 ORDER BY started_at DESC LIMIT 1", SELECT_RUN);
        let run: Option<SyncRun> = sqlx::query_as(&sql)
            .bind(kind)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }
}
