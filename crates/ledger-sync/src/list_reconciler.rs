//! # List Reconciler
//!
//! Full sweep of `GET /subscribers` into the ledger. Matches by external id,
//! inserts unknown subscribers with `details_synced = false` and refreshes
//! only the identity fields of known ones.
//!
//! ```text
//! offset = 0
//! loop:
//!   page = GET /subscribers?limit=N&offset=offset
//!   page empty                → stop
//!   upsert every row          (ReconciliationSync, a failed row is counted)
//!   hasMore == false          → stop
//!   hasMore absent, len < N   → stop
//!   offset += len
//! ```
//!
//! Re-running the sweep without remote changes writes nothing.

use tracing::{debug, info, warn};

use ledger_core::mapper::{self, ListRow};
use ledger_core::OperationOrigin;
use ledger_db::Database;

use crate::error::SyncResult;
use crate::remote::RemoteApi;

/// Counters returned by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListSyncReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    /// Rows whose ledger write failed. The sweep keeps going past them.
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct ListReconciler {
    api: RemoteApi,
    db: Database,
}

impl ListReconciler {
    pub fn new(api: RemoteApi, db: Database) -> Self {
        ListReconciler { api, db }
    }

    /// Pages through the remote collection and upserts every row.
    pub async fn sync_list(&self, page_size: usize) -> SyncResult<ListSyncReport> {
        let page_size = page_size.max(1);
        let mut report = ListSyncReport::default();
        let mut offset = 0;

        loop {
            let page = self.api.list_subscribers(page_size, offset).await?;
            let count = page.rows.len();
            debug!(offset, count, has_more = ?page.has_more, "Fetched subscriber page");

            if count == 0 {
                break;
            }
            report.fetched += count;

            for raw in &page.rows {
                let Some(row) = mapper::parse_list_row(raw) else {
                    warn!("Skipping list row without id or username");
                    continue;
                };
                if let Err(e) = self.upsert(&row, &mut report).await {
                    warn!(
                        external_id = row.external_id,
                        username = %row.username,
                        error = %e,
                        "Failed to store list row, continuing"
                    );
                    report.failed += 1;
                }
            }

            match page.has_more {
                Some(false) => break,
                None if count < page_size => break,
                _ => offset += count,
            }
        }

        info!(
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "Subscriber list synced"
        );
        Ok(report)
    }

    async fn upsert(&self, row: &ListRow, report: &mut ListSyncReport) -> SyncResult<()> {
        let repo = self.db.subscribers();

        match repo.find_by_external_id(row.external_id).await? {
            Some(mut sub) => {
                let before = sub.clone();
                mapper::apply_list_row(&mut sub, row);
                if sub != before {
                    repo.save(&sub, OperationOrigin::ReconciliationSync).await?;
                    report.updated += 1;
                }
            }
            None => {
                let sub = mapper::subscriber_from_list_row(row);
                if repo.exists(&sub.local_id).await? {
                    // Same local key, different (or no) external id.
                    warn!(
                        local_id = %sub.local_id,
                        external_id = row.external_id,
                        "Local subscriber with this key already exists, skipping"
                    );
                    return Ok(());
                }
                repo.insert(&sub, OperationOrigin::ReconciliationSync).await?;
                report.created += 1;
            }
        }
        Ok(())
    }
}
