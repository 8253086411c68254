//! # Job Scheduler Adapter and Worker
//!
//! Deferred reconciliation work goes through the persistent `sync_jobs`
//! queue. Callers only see the [`JobScheduler`] trait; the worker drains
//! the queue in the background.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  actions / pipeline triggers                                            │
//! │        │ enqueue(kind, queue, timeout)                                  │
//! │        ▼                                                                │
//! │  QueueScheduler ──► sync_jobs (queued)        duplicate open job?       │
//! │                          │                    → reuse it                │
//! │                          ▼                                              │
//! │  JobWorker (poll interval)                                              │
//! │     claim_next ──► tokio::time::timeout(job.timeout, JobRunner)         │
//! │        ├─ Ok                         → done                             │
//! │        ├─ retryable, attempts left   → reschedule(+ backoff)            │
//! │        └─ otherwise                  → failed                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Retries re-run the whole operation. That is safe: list and detail
//! reconciliation are idempotent.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ledger_db::{JobRepository, NewJob, SyncJob};

use crate::detail_reconciler::DetailReconciler;
use crate::error::{SyncError, SyncResult};
use crate::list_reconciler::ListReconciler;

/// Queue class used for every reconciliation job.
pub const LONG_QUEUE: &str = "long";

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30 * 60);

// =============================================================================
// Job Kinds
// =============================================================================

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncJobKind {
    SyncList { page_size: usize },
    SyncAllDetails,
    SyncDetails { local_id: String },
}

impl SyncJobKind {
    pub fn job_name(&self) -> &'static str {
        match self {
            SyncJobKind::SyncList { .. } => "sync_list",
            SyncJobKind::SyncAllDetails => "sync_all_details",
            SyncJobKind::SyncDetails { .. } => "sync_details",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            SyncJobKind::SyncList { page_size } => json!({ "page_size": page_size }),
            SyncJobKind::SyncAllDetails => json!({}),
            SyncJobKind::SyncDetails { local_id } => json!({ "local_id": local_id }),
        }
    }

    /// Decodes a queued row.
    pub fn from_job(job: &SyncJob) -> SyncResult<Self> {
        let payload = job.payload_json()?;
        match job.job_name.as_str() {
            "sync_list" => Ok(SyncJobKind::SyncList {
                page_size: payload
                    .get("page_size")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(50),
            }),
            "sync_all_details" => Ok(SyncJobKind::SyncAllDetails),
            "sync_details" => payload
                .get("local_id")
                .and_then(Value::as_str)
                .map(|id| SyncJobKind::SyncDetails {
                    local_id: id.to_string(),
                })
                .ok_or_else(|| SyncError::Serialization("sync_details job without local_id".into())),
            other => Err(SyncError::Internal(format!("unknown job '{}'", other))),
        }
    }
}

// =============================================================================
// Scheduler Adapter
// =============================================================================

/// A job accepted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueuedJob {
    pub id: String,
    /// An identical job was already open and was reused.
    pub deduplicated: bool,
}

/// `Enqueue(jobName, payload, queueClass, timeout)`.
#[async_trait]
pub trait JobScheduler: Send + Sync + std::fmt::Debug {
    async fn enqueue(&self, kind: SyncJobKind, queue: &str, timeout: Duration) -> SyncResult<EnqueuedJob>;
}

/// Scheduler backed by the ledger's job table.
#[derive(Debug, Clone)]
pub struct QueueScheduler {
    jobs: JobRepository,
}

impl QueueScheduler {
    pub fn new(jobs: JobRepository) -> Self {
        QueueScheduler { jobs }
    }
}

#[async_trait]
impl JobScheduler for QueueScheduler {
    async fn enqueue(&self, kind: SyncJobKind, queue: &str, timeout: Duration) -> SyncResult<EnqueuedJob> {
        let payload = kind.payload();
        if let Some(open) = self.jobs.find_open(kind.job_name(), &payload).await? {
            debug!(job_id = %open.id, job = kind.job_name(), "Identical job already open");
            return Ok(EnqueuedJob {
                id: open.id,
                deduplicated: true,
            });
        }

        let job = self
            .jobs
            .enqueue(&NewJob {
                job_name: kind.job_name().to_string(),
                payload,
                queue: queue.to_string(),
                timeout,
            })
            .await?;
        info!(job_id = %job.id, job = %job.job_name, queue = %job.queue, "Job enqueued");
        Ok(EnqueuedJob {
            id: job.id,
            deduplicated: false,
        })
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Executes a decoded job.
#[derive(Debug, Clone)]
pub struct JobRunner {
    list: ListReconciler,
    details: DetailReconciler,
    bulk_details: DetailReconciler,
}

impl JobRunner {
    /// `bulk_details` should use the bulk timeout profile.
    pub fn new(list: ListReconciler, details: DetailReconciler, bulk_details: DetailReconciler) -> Self {
        JobRunner {
            list,
            details,
            bulk_details,
        }
    }

    pub async fn execute(&self, kind: &SyncJobKind) -> SyncResult<()> {
        match kind {
            SyncJobKind::SyncList { page_size } => {
                self.list.sync_list(*page_size).await?;
            }
            SyncJobKind::SyncAllDetails => {
                // Per-record failures are already logged and counted on the run.
                self.bulk_details.sync_all_details().await?;
            }
            SyncJobKind::SyncDetails { local_id } => {
                self.details.sync_details(local_id).await?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Delay before the next attempt after `attempts` failed ones.
pub fn retry_delay(attempts: u32) -> Duration {
    let mut backoff = ExponentialBackoff {
        current_interval: INITIAL_RETRY_DELAY,
        initial_interval: INITIAL_RETRY_DELAY,
        max_interval: MAX_RETRY_DELAY,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut delay = INITIAL_RETRY_DELAY;
    for _ in 0..attempts.max(1) {
        delay = backoff.next_backoff().unwrap_or(MAX_RETRY_DELAY);
    }
    delay
}

/// Background worker draining the job queue.
pub struct JobWorker {
    jobs: JobRepository,
    runner: JobRunner,
    poll_interval: Duration,
    max_attempts: u32,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running worker.
#[derive(Clone)]
pub struct JobWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl JobWorkerHandle {
    /// Triggers graceful shutdown after the current job.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("Worker shutdown channel closed".into()))
    }
}

impl JobWorker {
    pub fn new(
        jobs: JobRepository,
        runner: JobRunner,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> (Self, JobWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = JobWorker {
            jobs,
            runner,
            poll_interval,
            max_attempts: max_attempts.max(1),
            shutdown_rx,
        };
        (worker, JobWorkerHandle { shutdown_tx })
    }

    /// Runs the worker loop until shutdown.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!("Job worker starting");

        match self.jobs.requeue_stale_running().await {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "Requeued jobs left running by a previous process"),
            Err(e) => error!(?e, "Failed to requeue stale jobs"),
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_pending().await {
                        error!(?e, "Failed to process job queue");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Job worker shutting down");
                    break;
                }
            }
        }

        info!("Job worker stopped");
    }

    /// Runs every job that is ready now. Returns how many were processed.
    pub async fn run_pending(&self) -> SyncResult<usize> {
        let mut processed = 0;
        while let Some(job) = self.jobs.claim_next(Utc::now()).await? {
            self.process(job).await?;
            processed += 1;
        }
        Ok(processed)
    }

    async fn process(&self, job: SyncJob) -> SyncResult<()> {
        debug!(job_id = %job.id, job = %job.job_name, attempt = job.attempts, "Running job");

        let result = match SyncJobKind::from_job(&job) {
            Ok(kind) => match tokio::time::timeout(job.timeout(), self.runner.execute(&kind)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(job.timeout().as_secs())),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.jobs.mark_done(&job.id).await?;
                info!(job_id = %job.id, job = %job.job_name, "Job done");
            }
            Err(e) if e.is_retryable() && job.attempts < i64::from(self.max_attempts) => {
                let delay = retry_delay(job.attempts.max(1) as u32);
                let run_after = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::minutes(30));
                warn!(
                    job_id = %job.id,
                    job = %job.job_name,
                    attempt = job.attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "Job failed, rescheduling"
                );
                self.jobs.reschedule(&job.id, &e.to_string(), run_after).await?;
            }
            Err(e) => {
                error!(job_id = %job.id, job = %job.job_name, attempt = job.attempts, error = %e, "Job failed");
                self.jobs.mark_failed(&job.id, &e.to_string()).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_db::{Database, DbConfig, JobStatus};

    #[test]
    fn test_retry_delay_grows_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(30));
        assert_eq!(retry_delay(2), Duration::from_secs(60));
        assert_eq!(retry_delay(3), Duration::from_secs(120));
        assert_eq!(retry_delay(20), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_job_kind_payloads() {
        let kind = SyncJobKind::SyncDetails {
            local_id: "alice".into(),
        };
        assert_eq!(kind.job_name(), "sync_details");
        assert_eq!(kind.payload()["local_id"], "alice");
        assert_eq!(SyncJobKind::SyncList { page_size: 25 }.payload()["page_size"], 25);
    }

    #[tokio::test]
    async fn test_scheduler_reuses_open_job() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let scheduler = QueueScheduler::new(db.jobs());
        let kind = SyncJobKind::SyncDetails {
            local_id: "alice".into(),
        };

        let first = scheduler
            .enqueue(kind.clone(), LONG_QUEUE, Duration::from_secs(600))
            .await
            .unwrap();
        let second = scheduler
            .enqueue(kind, LONG_QUEUE, Duration::from_secs(600))
            .await
            .unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.id, second.id);
        assert_eq!(db.jobs().count_by_status(JobStatus::Queued).await.unwrap(), 1);

        let stored = db.jobs().get(&first.id).await.unwrap().unwrap();
        assert_eq!(stored.queue, "long");
        assert_eq!(stored.timeout_secs, 600);
        assert_eq!(
            SyncJobKind::from_job(&stored).unwrap(),
            SyncJobKind::SyncDetails {
                local_id: "alice".into()
            }
        );
    }
}
