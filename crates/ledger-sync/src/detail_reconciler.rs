//! # Detail Reconciler
//!
//! Mirrors the full remote record of one subscriber into the ledger, then
//! reconciles its document roster. The bulk variant walks every local
//! subscriber and checkpoints its progress.
//!
//! ## Single Record
//! ```text
//! external_id? ──no──► no-op
//!      │ yes
//!      ▼
//! GET /subscribers/{id} ──► resolve link ids ──► apply_remote_detail
//!      │
//!      ▼
//! changed or not yet synced? ──yes──► save (ReconciliationSync,
//!      │                                 details_synced = true, now)
//!      ▼
//! DocumentSynchronizer::sync_documents
//! ```
//!
//! ## Bulk
//! ```text
//! sync_runs row ──► for each local id (one at a time, fetch order)
//!                      ├─ ok    → succeeded += 1
//!                      ├─ error → failed += 1, log, continue
//!                      └─ every N records → checkpoint
//!                   finish(total, succeeded, failed)
//! ```

use chrono::Utc;
use tracing::{debug, error, info, warn};

use ledger_core::{mapper, OperationOrigin};
use ledger_db::{Database, RunProgress, RunStatus};

use crate::correlation::CorrelationResolver;
use crate::documents::{DocumentSynchronizer, RosterReport};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteApi;

/// `sync_runs.kind` of the bulk job.
pub const BULK_DETAILS_RUN: &str = "sync_all_details";

/// What a single-record sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailSyncReport {
    /// No external id; nothing was fetched.
    pub skipped: bool,
    /// The record was written.
    pub written: bool,
    pub documents: RosterReport,
}

/// Result of a bulk run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDetailReport {
    pub run_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub status: RunStatus,
}

impl BulkDetailReport {
    /// The run as a `PartialFailure` when any record failed.
    pub fn as_partial_failure(&self) -> Option<SyncError> {
        (self.failed > 0).then(|| SyncError::PartialFailure {
            operation: BULK_DETAILS_RUN.to_string(),
            failed: self.failed,
            total: self.total,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DetailReconciler {
    api: RemoteApi,
    db: Database,
    correlations: CorrelationResolver,
    documents: DocumentSynchronizer,
    checkpoint_every: usize,
}

impl DetailReconciler {
    pub fn new(
        api: RemoteApi,
        db: Database,
        correlations: CorrelationResolver,
        documents: DocumentSynchronizer,
        checkpoint_every: usize,
    ) -> Self {
        DetailReconciler {
            api,
            db,
            correlations,
            documents,
            checkpoint_every: checkpoint_every.max(1),
        }
    }

    /// Copy of this reconciler using another API (bulk timeout profile).
    pub fn with_api(&self, api: RemoteApi) -> Self {
        DetailReconciler {
            documents: self.documents.with_api(api.clone()),
            api,
            db: self.db.clone(),
            correlations: self.correlations.clone(),
            checkpoint_every: self.checkpoint_every,
        }
    }

    // =========================================================================
    // Single Record
    // =========================================================================

    pub async fn sync_details(&self, local_id: &str) -> SyncResult<DetailSyncReport> {
        let mut sub = self.db.subscribers().get_required(local_id).await?;
        let Some(external_id) = sub.external_id else {
            debug!(local_id = %local_id, "No external id, skipping detail sync");
            return Ok(DetailSyncReport {
                skipped: true,
                ..Default::default()
            });
        };

        let detail = self.api.get_subscriber(external_id).await?;
        let links = self.correlations.resolve_detail_links(&detail).await?;

        let before = sub.clone();
        let unknown = mapper::apply_remote_detail(&mut sub, &detail, &links);
        for (field, code) in &unknown {
            debug!(local_id = %local_id, field, code = %code, "Unknown remote code");
        }

        let written = sub != before || !sub.details_synced;
        if written {
            sub.details_synced = true;
            sub.details_synced_at = Some(Utc::now());
            self.db
                .subscribers()
                .save(&sub, OperationOrigin::ReconciliationSync)
                .await?;
            debug!(local_id = %local_id, external_id, state = "details_synced", "Subscriber details mirrored");
        }

        let documents = self.documents.sync_documents(local_id).await?;

        Ok(DetailSyncReport {
            skipped: false,
            written,
            documents,
        })
    }

    // =========================================================================
    // Bulk
    // =========================================================================

    /// Syncs every local subscriber. Per-record failures are logged and
    /// counted; only ledger failures around the run itself abort it.
    pub async fn sync_all_details(&self) -> SyncResult<BulkDetailReport> {
        let ids = self.db.subscribers().list_local_ids().await?;
        let total = ids.len();
        let run = self.db.sync_runs().start(BULK_DETAILS_RUN, total as i64).await?;
        info!(run_id = %run.id, total, "Starting bulk detail sync");

        let mut progress = RunProgress::default();
        for (index, local_id) in ids.iter().enumerate() {
            match self.sync_details(local_id).await {
                Ok(_) => progress.succeeded += 1,
                Err(e) => {
                    progress.failed += 1;
                    warn!(local_id = %local_id, error = %e, "Detail sync failed, continuing");
                }
            }
            progress.processed += 1;

            if (index + 1) % self.checkpoint_every == 0 {
                if let Err(e) = self
                    .db
                    .sync_runs()
                    .checkpoint(&run.id, progress, Some(local_id))
                    .await
                {
                    error!(run_id = %run.id, error = %e, "Failed to write checkpoint");
                }
                debug!(run_id = %run.id, processed = progress.processed, "Checkpoint");
            }
        }

        let status = self.db.sync_runs().finish(&run.id, progress).await?;
        let report = BulkDetailReport {
            run_id: run.id,
            total,
            succeeded: progress.succeeded as usize,
            failed: progress.failed as usize,
            status,
        };

        match report.as_partial_failure() {
            Some(partial) => warn!(run_id = %report.run_id, "{}", partial),
            None => info!(run_id = %report.run_id, total, "Bulk detail sync complete"),
        }
        Ok(report)
    }
}
