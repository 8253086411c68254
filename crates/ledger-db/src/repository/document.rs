//! # Document Roster Repository
//!
//! Attachment rows of a subscriber, kept in `subscriber_documents` in roster
//! order (`position`).
//!
//! Whole-roster writes happen inside the subscriber's own transaction (see
//! [`replace_roster`]); this repository handles the single-row write-backs of
//! the upload step and the document synchronizer.

use chrono::{NaiveDateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use ledger_core::{DocumentAttachment, OperationOrigin};

/// Row of `subscriber_documents`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRecord {
    pub row_id: String,
    pub subscriber_local_id: String,
    pub position: i64,
    pub file_path: Option<String>,
    pub label: Option<String>,
    pub note: Option<String>,
    pub remote_document_id: Option<i64>,
    pub remote_file_link: Option<String>,
    pub verification_status: Option<String>,
    pub uploaded: bool,
    pub uploaded_at: Option<NaiveDateTime>,
    pub last_upload_error: Option<String>,
}

impl From<DocumentRecord> for DocumentAttachment {
    fn from(r: DocumentRecord) -> Self {
        DocumentAttachment {
            row_id: r.row_id,
            file_path: r.file_path,
            label: r.label,
            note: r.note,
            remote_document_id: r.remote_document_id,
            remote_file_link: r.remote_file_link,
            verification_status: r.verification_status,
            uploaded: r.uploaded,
            uploaded_at: r.uploaded_at,
            last_upload_error: r.last_upload_error,
        }
    }
}

const SELECT_ROSTER: &str = r#"
    SELECT
        row_id, subscriber_local_id, position, file_path, label, note,
        remote_document_id, remote_file_link, verification_status,
        uploaded, uploaded_at, last_upload_error
    FROM subscriber_documents
    WHERE subscriber_local_id = ?1
    ORDER BY position ASC, row_id ASC
"#;

/// Loads a roster on an already acquired connection.
pub(crate) async fn load_roster(
    conn: &mut SqliteConnection,
    local_id: &str,
) -> DbResult<Vec<DocumentAttachment>> {
    let rows: Vec<DocumentRecord> = sqlx::query_as(SELECT_ROSTER)
        .bind(local_id)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(DocumentAttachment::from).collect())
}

/// Replaces a subscriber's whole roster. Runs inside the caller's transaction.
pub(crate) async fn replace_roster(
    conn: &mut SqliteConnection,
    local_id: &str,
    documents: &[DocumentAttachment],
) -> DbResult<()> {
    sqlx::query("DELETE FROM subscriber_documents WHERE subscriber_local_id = ?1")
        .bind(local_id)
        .execute(&mut *conn)
        .await?;

    for (position, doc) in documents.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO subscriber_documents (
                row_id, subscriber_local_id, position, file_path, label, note,
                remote_document_id, remote_file_link, verification_status,
                uploaded, uploaded_at, last_upload_error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&doc.row_id)
        .bind(local_id)
        .bind(position as i64)
        .bind(&doc.file_path)
        .bind(&doc.label)
        .bind(&doc.note)
        .bind(doc.remote_document_id)
        .bind(&doc.remote_file_link)
        .bind(&doc.verification_status)
        .bind(doc.uploaded)
        .bind(doc.uploaded_at)
        .bind(&doc.last_upload_error)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Repository for single attachment rows.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    /// Creates a new DocumentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DocumentRepository { pool }
    }

    /// Returns a subscriber's roster in order.
    pub async fn list_for(&self, local_id: &str) -> DbResult<Vec<DocumentAttachment>> {
        let mut conn = self.pool.acquire().await?;
        load_roster(&mut conn, local_id).await
    }

    /// Writes one row back without touching the rest of the record.
    ///
    /// Used by the upload step (remote id, link, error) under a
    /// non-user origin, so no lifecycle hook runs.
    pub async fn update_row(
        &self,
        local_id: &str,
        doc: &DocumentAttachment,
        origin: OperationOrigin,
    ) -> DbResult<()> {
        debug!(
            local_id = %local_id,
            row_id = %doc.row_id,
            origin = %origin,
            "Writing document row"
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE subscriber_documents SET
                file_path = ?3,
                label = ?4,
                note = ?5,
                remote_document_id = ?6,
                remote_file_link = ?7,
                verification_status = ?8,
                uploaded = ?9,
                uploaded_at = ?10,
                last_upload_error = ?11
            WHERE row_id = ?1 AND subscriber_local_id = ?2
            "#,
        )
        .bind(&doc.row_id)
        .bind(local_id)
        .bind(&doc.file_path)
        .bind(&doc.label)
        .bind(&doc.note)
        .bind(doc.remote_document_id)
        .bind(&doc.remote_file_link)
        .bind(&doc.verification_status)
        .bind(doc.uploaded)
        .bind(doc.uploaded_at)
        .bind(&doc.last_upload_error)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Document row", &doc.row_id));
        }

        sqlx::query(
            "UPDATE subscribers SET last_write_origin = ?2, updated_at = ?3 WHERE local_id = ?1",
        )
        .bind(local_id)
        .bind(origin)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    /// Removes one row. Returns false if it did not exist.
    pub async fn delete_row(&self, row_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM subscriber_documents WHERE row_id = ?1")
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
