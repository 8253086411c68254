//! # Correlation Repository
//!
//! Local cache of remote ids for the foreign entities a subscriber links to
//! (ISP, branch, plan, NAS, salesperson, IP pool, IP address).
//!
//! ```text
//! (kind, local_id) ──PK──► external_id
//! (kind, external_id) ──UNIQUE──► local_id
//! ```
//!
//! The tables are filled by simple one-way catalog syncs; this crate only
//! exposes the upsert they call.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use ledger_core::{CorrelationEntry, CorrelationKind};

#[derive(Debug, Clone, sqlx::FromRow)]
struct CorrelationRecord {
    kind: CorrelationKind,
    local_id: String,
    external_id: i64,
    display_name: Option<String>,
    username: Option<String>,
    user_login: Option<String>,
    parent_isp_external_id: Option<i64>,
    parent_branch_local_id: Option<String>,
    refreshed_at: DateTime<Utc>,
}

impl From<CorrelationRecord> for CorrelationEntry {
    fn from(r: CorrelationRecord) -> Self {
        CorrelationEntry {
            kind: r.kind,
            local_id: r.local_id,
            external_id: r.external_id,
            display_name: r.display_name,
            username: r.username,
            user_login: r.user_login,
            parent_isp_external_id: r.parent_isp_external_id,
            parent_branch_local_id: r.parent_branch_local_id,
            refreshed_at: r.refreshed_at,
        }
    }
}

const SELECT_CORRELATION: &str = r#"
    SELECT
        kind, local_id, external_id, display_name, username, user_login,
        parent_isp_external_id, parent_branch_local_id, refreshed_at
    FROM correlations
"#;

/// Repository for correlation rows.
#[derive(Debug, Clone)]
pub struct CorrelationRepository {
    pool: SqlitePool,
}

impl CorrelationRepository {
    /// Creates a new CorrelationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CorrelationRepository { pool }
    }

    /// Inserts or refreshes a row keyed by (kind, local_id).
    pub async fn upsert(&self, entry: &CorrelationEntry) -> DbResult<()> {
        debug!(
            kind = %entry.kind,
            local_id = %entry.local_id,
            external_id = entry.external_id,
            "Upserting correlation"
        );

        sqlx::query(
            r#"
            INSERT INTO correlations (
                kind, local_id, external_id, display_name, username, user_login,
                parent_isp_external_id, parent_branch_local_id, refreshed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (kind, local_id) DO UPDATE SET
                external_id = excluded.external_id,
                display_name = excluded.display_name,
                username = excluded.username,
                user_login = excluded.user_login,
                parent_isp_external_id = excluded.parent_isp_external_id,
                parent_branch_local_id = excluded.parent_branch_local_id,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(entry.kind)
        .bind(&entry.local_id)
        .bind(entry.external_id)
        .bind(&entry.display_name)
        .bind(&entry.username)
        .bind(&entry.user_login)
        .bind(entry.parent_isp_external_id)
        .bind(&entry.parent_branch_local_id)
        .bind(entry.refreshed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Looks a row up by local key.
    pub async fn get(&self, kind: CorrelationKind, local_id: &str) -> DbResult<Option<CorrelationEntry>> {
        let sql = format!("{} WHERE kind = ?1 AND local_id = ?2", SELECT_CORRELATION);
        let record: Option<CorrelationRecord> = sqlx::query_as(&sql)
            .bind(kind)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(CorrelationEntry::from))
    }

    /// Looks a row up by remote id.
    pub async fn find_by_external_id(
        &self,
        kind: CorrelationKind,
        external_id: i64,
    ) -> DbResult<Option<CorrelationEntry>> {
        let sql = format!("{} WHERE kind = ?1 AND external_id = ?2", SELECT_CORRELATION);
        let record: Option<CorrelationRecord> = sqlx::query_as(&sql)
            .bind(kind)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(CorrelationEntry::from))
    }

    /// Salesperson row belonging to a local user login.
    pub async fn salesperson_for_login(&self, login: &str) -> DbResult<Option<CorrelationEntry>> {
        let sql = format!(
            "{} WHERE kind = ?1 AND user_login = ?2 ORDER BY local_id LIMIT 1",
            SELECT_CORRELATION
        );
        let record: Option<CorrelationRecord> = sqlx::query_as(&sql)
            .bind(CorrelationKind::Salesperson)
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(CorrelationEntry::from))
    }

    /// Salesperson row by display name, used when a detail record names a
    /// salesperson whose id is not cached.
    pub async fn salesperson_by_name(&self, name: &str) -> DbResult<Option<CorrelationEntry>> {
        let sql = format!(
            "{} WHERE kind = ?1 AND (display_name = ?2 OR local_id = ?2) ORDER BY local_id LIMIT 1",
            SELECT_CORRELATION
        );
        let record: Option<CorrelationRecord> = sqlx::query_as(&sql)
            .bind(CorrelationKind::Salesperson)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record.map(CorrelationEntry::from))
    }

    /// All rows of one kind.
    pub async fn list(&self, kind: CorrelationKind) -> DbResult<Vec<CorrelationEntry>> {
        let sql = format!("{} WHERE kind = ?1 ORDER BY local_id", SELECT_CORRELATION);
        let records: Vec<CorrelationRecord> = sqlx::query_as(&sql)
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(CorrelationEntry::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use ledger_core::{CorrelationEntry, CorrelationKind};

    #[tokio::test]
    async fn test_upsert_and_lookup_both_ways() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.correlations();

        let mut plan = CorrelationEntry::new(CorrelationKind::Plan, "FIBER-100", 77);
        repo.upsert(&plan).await.unwrap();
        plan.display_name = Some("Fiber 100".into());
        repo.upsert(&plan).await.unwrap();

        let by_local = repo.get(CorrelationKind::Plan, "FIBER-100").await.unwrap().unwrap();
        assert_eq!(by_local.external_id, 77);
        assert_eq!(by_local.display_name.as_deref(), Some("Fiber 100"));

        let by_remote = repo
            .find_by_external_id(CorrelationKind::Plan, 77)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_remote.local_id, "FIBER-100");
        assert!(repo.find_by_external_id(CorrelationKind::Nas, 77).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_salesperson_for_login() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.correlations();

        let mut sp = CorrelationEntry::new(CorrelationKind::Salesperson, "SP-1", 501);
        sp.user_login = Some("clerk@example.net".into());
        sp.display_name = Some("Sales One".into());
        repo.upsert(&sp).await.unwrap();

        let found = repo.salesperson_for_login("clerk@example.net").await.unwrap().unwrap();
        assert_eq!(found.external_id, 501);
        assert!(repo.salesperson_by_name("Sales One").await.unwrap().is_some());
        assert_eq!(repo.list(CorrelationKind::Salesperson).await.unwrap().len(), 1);
    }
}
