//! # Document Synchronizer
//!
//! Keeps a subscriber's attachment roster aligned with the backend's
//! document set, and pushes pending local files.
//!
//! ## Roster Reconciliation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  local roster                     remote set {1}                        │
//! │  ─────────────                    ──────────────                        │
//! │  A (remote_id = 1)   ── present ──► overwrite from remote, keep         │
//! │  B (remote_id = 2)   ── absent  ──► drop (deleted remotely)             │
//! │  C (pending, no id)  ── n/a     ──► keep untouched (upload not tried)   │
//! │                                                                         │
//! │  remote docs with no local row ──► append a new mirrored row            │
//! │                                                                         │
//! │  result: [A', C]  written once, under ReconciliationSync, and only      │
//! │          if it differs from what is stored                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Uploads
//! Each pending row is uploaded on its own. A failed upload records the
//! error on that row and the loop moves on; nothing is retried here.

use chrono::{NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ledger_core::mapper::{self, RemoteDocument, UploadOwner, UploadReceipt};
use ledger_core::{DocumentAttachment, OperationOrigin, Subscriber};
use ledger_db::Database;

use crate::error::{SyncError, SyncResult};
use crate::gateway::{DeleteOutcome, UploadForm};
use crate::remote::RemoteApi;

/// What a roster reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterReport {
    /// The subscriber has no external id; nothing was fetched.
    pub skipped: bool,
    /// The remote fetch failed and was logged.
    pub fetch_failed: bool,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Whether the roster was written back.
    pub written: bool,
}

/// Outcome of uploading every pending row of one subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub attempted: usize,
    pub uploaded: usize,
    /// `(row_id, error)` for every row that failed.
    pub failures: Vec<(String, String)>,
}

impl UploadReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Rebuilds a roster from the fetched remote set. Pure.
///
/// Returns the new roster plus `(added, updated, removed)` counts.
pub fn reconcile_roster(
    current: &[DocumentAttachment],
    remote: &[RemoteDocument],
    now: NaiveDateTime,
) -> (Vec<DocumentAttachment>, usize, usize, usize) {
    let by_id: HashMap<i64, &RemoteDocument> = remote.iter().map(|d| (d.id, d)).collect();
    let mut roster = Vec::with_capacity(current.len() + remote.len());
    let mut seen = std::collections::HashSet::new();
    let (mut updated, mut removed) = (0, 0);

    for row in current {
        match row.remote_document_id {
            Some(id) => match by_id.get(&id) {
                Some(remote_doc) if seen.insert(id) => {
                    let mut row = row.clone();
                    mapper::apply_remote_document(&mut row, remote_doc, now);
                    roster.push(row);
                    updated += 1;
                }
                _ => removed += 1,
            },
            None => roster.push(row.clone()),
        }
    }

    let mut added = 0;
    for remote_doc in remote {
        if seen.insert(remote_doc.id) {
            let mut row = DocumentAttachment {
                row_id: Uuid::new_v4().to_string(),
                file_path: None,
                label: None,
                note: None,
                remote_document_id: None,
                remote_file_link: None,
                verification_status: None,
                uploaded: false,
                uploaded_at: None,
                last_upload_error: None,
            };
            mapper::apply_remote_document(&mut row, remote_doc, now);
            roster.push(row);
            added += 1;
        }
    }

    (roster, added, updated, removed)
}

#[derive(Debug, Clone)]
pub struct DocumentSynchronizer {
    api: RemoteApi,
    db: Database,
}

impl DocumentSynchronizer {
    pub fn new(api: RemoteApi, db: Database) -> Self {
        DocumentSynchronizer { api, db }
    }

    /// Copy of this synchronizer using another API timeout profile.
    pub fn with_api(&self, api: RemoteApi) -> Self {
        DocumentSynchronizer::new(api, self.db.clone())
    }

    // =========================================================================
    // Roster Reconciliation
    // =========================================================================

    /// Reconciles one subscriber's roster against the backend.
    ///
    /// A failed fetch is logged and reported, never raised: the roster is
    /// secondary to the subscriber record it hangs off.
    pub async fn sync_documents(&self, local_id: &str) -> SyncResult<RosterReport> {
        let mut sub = self.db.subscribers().get_required(local_id).await?;
        let Some(external_id) = sub.external_id else {
            debug!(local_id = %local_id, "No external id, skipping document sync");
            return Ok(RosterReport {
                skipped: true,
                ..Default::default()
            });
        };

        let remote = match self.api.list_documents(external_id).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(local_id = %local_id, external_id, error = %e, "Document fetch failed");
                return Ok(RosterReport {
                    fetch_failed: true,
                    ..Default::default()
                });
            }
        };

        let now = Utc::now().naive_utc();
        let (roster, added, updated, removed) = reconcile_roster(&sub.documents, &remote, now);
        let written = roster != sub.documents;

        if written {
            sub.documents = roster;
            self.db
                .subscribers()
                .save(&sub, OperationOrigin::ReconciliationSync)
                .await?;
        }

        debug!(
            local_id = %local_id,
            added,
            updated,
            removed,
            written,
            "Document roster reconciled"
        );

        Ok(RosterReport {
            skipped: false,
            fetch_failed: false,
            added,
            updated,
            removed,
            written,
        })
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Uploads one row and writes the result back onto it.
    ///
    /// On failure the row keeps `uploaded = false` and records the error.
    pub async fn upload_document(
        &self,
        local_id: &str,
        row: &DocumentAttachment,
        owner: &UploadOwner,
    ) -> SyncResult<UploadReceipt> {
        let result = self.push_file(row, owner).await;
        let mut stored = row.clone();

        match &result {
            Ok(receipt) => {
                stored.remote_document_id = Some(receipt.remote_document_id);
                stored.remote_file_link = receipt.file_link.clone();
                stored.verification_status = receipt.verification_status.clone();
                stored.uploaded = true;
                stored.uploaded_at = Some(Utc::now().naive_utc());
                stored.last_upload_error = None;
                info!(
                    local_id = %local_id,
                    row_id = %row.row_id,
                    remote_document_id = receipt.remote_document_id,
                    "Document uploaded"
                );
            }
            Err(e) => {
                stored.uploaded = false;
                stored.last_upload_error = Some(e.to_string());
                error!(local_id = %local_id, row_id = %row.row_id, error = %e, "Document upload failed");
            }
        }

        self.db
            .documents()
            .update_row(local_id, &stored, OperationOrigin::ReconciliationSync)
            .await?;

        result
    }

    async fn push_file(&self, row: &DocumentAttachment, owner: &UploadOwner) -> SyncResult<UploadReceipt> {
        let path = row
            .file_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| SyncError::precondition(format!("document row {} has no file", row.row_id)))?;

        let content = tokio::fs::read(path).await?;
        let file_name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let document_name = row
            .label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| file_name.clone());
        let mime = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let form = UploadForm {
            fields: mapper::upload_form_fields(&document_name, owner, Utc::now().naive_utc()),
            file_field: "file",
            file_name,
            mime,
            content,
        };
        self.api.upload_document(form).await
    }

    /// Uploads every row still waiting for the upload step.
    pub async fn upload_pending(&self, sub: &Subscriber, owner: &UploadOwner) -> UploadReport {
        let mut report = UploadReport::default();
        let pending = sub
            .documents
            .iter()
            .filter(|d| d.needs_upload() && d.file_path.is_some());

        for row in pending {
            report.attempted += 1;
            match self.upload_document(&sub.local_id, row, owner).await {
                Ok(_) => report.uploaded += 1,
                Err(e) => report.failures.push((row.row_id.clone(), e.to_string())),
            }
        }

        if report.failed() > 0 {
            warn!(
                local_id = %sub.local_id,
                failed = report.failed(),
                attempted = report.attempted,
                "Some document uploads failed"
            );
        }
        report
    }

    /// Deletes documents removed from the roster. 404 counts as done.
    pub async fn delete_remote_documents(&self, document_ids: &[i64]) -> SyncResult<()> {
        for id in document_ids {
            match self.api.delete_document(*id).await? {
                DeleteOutcome::Deleted => debug!(document_id = id, "Remote document deleted"),
                DeleteOutcome::AlreadyGone => debug!(document_id = id, "Remote document already gone"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn mirrored(row_id: &str, remote_id: i64) -> DocumentAttachment {
        let mut row = DocumentAttachment::pending(row_id, format!("/tmp/{row_id}.pdf"));
        row.remote_document_id = Some(remote_id);
        row.uploaded = true;
        row
    }

    fn remote(id: i64) -> RemoteDocument {
        RemoteDocument {
            id,
            file_name: Some(format!("doc-{id}.pdf")),
            note: None,
            file_link: Some(format!("https://files.example/{id}")),
            verification_status: Some("1".into()),
            created_at: NaiveDate::from_ymd_opt(2024, 1, 2)
                .and_then(|d| d.and_hms_opt(10, 0, 0)),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    #[test]
    fn test_roster_drops_remotely_deleted_and_keeps_pending() {
        let current = vec![
            mirrored("a", 1),
            mirrored("b", 2),
            DocumentAttachment::pending("c", "/tmp/c.pdf"),
        ];
        let (roster, added, updated, removed) = reconcile_roster(&current, &[remote(1)], now());

        let ids: Vec<&str> = roster.iter().map(|r| r.row_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!((added, updated, removed), (0, 1, 1));
        assert_eq!(roster[0].remote_file_link.as_deref(), Some("https://files.example/1"));
        assert_eq!(roster[1], current[2]);
    }

    #[test]
    fn test_roster_appends_unknown_remote_documents() {
        let (roster, added, _, _) = reconcile_roster(&[], &[remote(5)], now());
        assert_eq!(added, 1);
        assert_eq!(roster[0].remote_document_id, Some(5));
        assert!(roster[0].uploaded);
        assert!(roster[0].file_path.is_none());
    }

    #[test]
    fn test_roster_is_stable_on_second_pass() {
        let current = vec![mirrored("a", 1)];
        let (first, ..) = reconcile_roster(&current, &[remote(1)], now());
        let (second, ..) = reconcile_roster(&first, &[remote(1)], now());
        assert_eq!(first, second);
    }
}
