//! # Subscriber Repository
//!
//! Stores subscribers and their attachment rosters.
//!
//! ## Two Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert() / save()                                                     │
//! │    whole record + roster, one transaction                              │
//! │    used by the lifecycle layer and by the reconcilers                  │
//! │                                                                         │
//! │  set_fields()                                                          │
//! │    a few named columns only (external id, canonical username,          │
//! │    provisioning error, ...), one transaction                           │
//! │    used mid-saga, where a full save would race the user's record       │
//! │                                                                         │
//! │  Both stamp last_write_origin with the caller's OperationOrigin.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::document::{load_roster, replace_roster};
use ledger_core::{ConnectionStatus, Linkage, OperationOrigin, Subscriber, SubscriberProfile};

// =============================================================================
// Record Types
// =============================================================================

/// Row of `subscribers`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriberRecord {
    pub local_id: String,
    pub external_id: Option<i64>,
    pub username: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub profile: String,
    pub links: String,
    pub details_synced: bool,
    pub details_synced_at: Option<DateTime<Utc>>,
    pub remote_created_at: Option<NaiveDateTime>,
    pub portal_password_set: bool,
    pub connection_password_set: bool,
    pub last_write_origin: OperationOrigin,
    pub last_provision_error: Option<String>,
}

impl SubscriberRecord {
    fn into_subscriber(self, documents: Vec<ledger_core::DocumentAttachment>) -> DbResult<Subscriber> {
        let status: ConnectionStatus = self
            .status
            .parse()
            .map_err(|e: String| DbError::Internal(format!("subscriber {}: {}", self.local_id, e)))?;
        let profile: SubscriberProfile = serde_json::from_str(&self.profile)
            .map_err(|e| DbError::serialization("subscribers.profile", e))?;
        let links: Linkage = serde_json::from_str(&self.links)
            .map_err(|e| DbError::serialization("subscribers.links", e))?;

        Ok(Subscriber {
            local_id: self.local_id,
            external_id: self.external_id,
            username: self.username,
            full_name: self.full_name,
            phone: self.phone,
            email: self.email,
            status,
            profile,
            links,
            details_synced: self.details_synced,
            details_synced_at: self.details_synced_at,
            remote_created_at: self.remote_created_at,
            portal_password_set: self.portal_password_set,
            connection_password_set: self.connection_password_set,
            last_write_origin: self.last_write_origin,
            last_provision_error: self.last_provision_error,
            documents,
        })
    }
}

const SELECT_SUBSCRIBER: &str = r#"
    SELECT
        local_id, external_id, username, full_name, phone, email, status,
        profile, links, details_synced, details_synced_at, remote_created_at,
        portal_password_set, connection_password_set,
        last_write_origin, last_provision_error
    FROM subscribers
"#;

/// A single column written through [`SubscriberRepository::set_fields`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberField {
    ExternalId(Option<i64>),
    Username(String),
    RemoteCreatedAt(Option<NaiveDateTime>),
    ProvisionError(Option<String>),
    PortalPasswordSet(bool),
    ConnectionPasswordSet(bool),
    DetailsSynced {
        synced: bool,
        at: Option<DateTime<Utc>>,
    },
}

fn encode_json<T: serde::Serialize>(field: &str, value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::serialization(field, e))
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for subscriber records.
#[derive(Debug, Clone)]
pub struct SubscriberRepository {
    pool: SqlitePool,
}

impl SubscriberRepository {
    /// Creates a new SubscriberRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SubscriberRepository { pool }
    }

    async fn fetch_where(
        conn: &mut SqliteConnection,
        clause: &str,
        bind: SubscriberKey<'_>,
    ) -> DbResult<Option<Subscriber>> {
        let sql = format!("{} WHERE {}", SELECT_SUBSCRIBER, clause);
        let query = sqlx::query_as::<_, SubscriberRecord>(&sql);
        let query = match bind {
            SubscriberKey::Local(id) => query.bind(id.to_string()),
            SubscriberKey::External(id) => query.bind(id),
        };
        let Some(record) = query.fetch_optional(&mut *conn).await? else {
            return Ok(None);
        };
        let documents = load_roster(conn, &record.local_id).await?;
        record.into_subscriber(documents).map(Some)
    }

    /// Gets a subscriber (with roster) by local id.
    pub async fn get(&self, local_id: &str) -> DbResult<Option<Subscriber>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_where(&mut conn, "local_id = ?1", SubscriberKey::Local(local_id)).await
    }

    /// Gets a subscriber or fails with `NotFound`.
    pub async fn get_required(&self, local_id: &str) -> DbResult<Subscriber> {
        self.get(local_id)
            .await?
            .ok_or_else(|| DbError::not_found("Subscriber", local_id))
    }

    /// Gets a subscriber by its backend id.
    pub async fn find_by_external_id(&self, external_id: i64) -> DbResult<Option<Subscriber>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_where(
            &mut conn,
            "external_id = ?1",
            SubscriberKey::External(external_id),
        )
        .await
    }

    /// Returns the local id mirroring a backend id, if any.
    pub async fn local_id_for_external(&self, external_id: i64) -> DbResult<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT local_id FROM subscribers WHERE external_id = ?1")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    /// Returns true if a local id is taken.
    pub async fn exists(&self, local_id: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers WHERE local_id = ?1")
            .bind(local_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Every local id, oldest first.
    pub async fn list_local_ids(&self) -> DbResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT local_id FROM subscribers ORDER BY created_at ASC, local_id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    /// Counts subscribers.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts a new subscriber and its roster.
    ///
    /// ## Errors
    /// `UniqueViolation` if the local id or the external id is taken.
    pub async fn insert(&self, sub: &Subscriber, origin: OperationOrigin) -> DbResult<()> {
        debug!(local_id = %sub.local_id, origin = %origin, "Inserting subscriber");

        let profile = encode_json("subscribers.profile", &sub.profile)?;
        let links = encode_json("subscribers.links", &sub.links)?;
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO subscribers (
                local_id, external_id, username, full_name, phone, email, status,
                profile, links, details_synced, details_synced_at, remote_created_at,
                portal_password_set, connection_password_set,
                last_write_origin, last_provision_error, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14,
                ?15, ?16, ?17, ?17
            )
            "#,
        )
        .bind(&sub.local_id)
        .bind(sub.external_id)
        .bind(&sub.username)
        .bind(&sub.full_name)
        .bind(&sub.phone)
        .bind(&sub.email)
        .bind(sub.status.as_str())
        .bind(profile)
        .bind(links)
        .bind(sub.details_synced)
        .bind(sub.details_synced_at)
        .bind(sub.remote_created_at)
        .bind(sub.portal_password_set)
        .bind(sub.connection_password_set)
        .bind(origin)
        .bind(&sub.last_provision_error)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(
                field,
                sub.external_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| sub.local_id.clone()),
            ),
            other => other,
        })?;

        replace_roster(&mut tx, &sub.local_id, &sub.documents).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    /// Overwrites an existing subscriber and its roster.
    ///
    /// ## Errors
    /// `NotFound` if the local id does not exist.
    pub async fn save(&self, sub: &Subscriber, origin: OperationOrigin) -> DbResult<()> {
        debug!(local_id = %sub.local_id, origin = %origin, "Saving subscriber");

        let profile = encode_json("subscribers.profile", &sub.profile)?;
        let links = encode_json("subscribers.links", &sub.links)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE subscribers SET
                external_id = ?2,
                username = ?3,
                full_name = ?4,
                phone = ?5,
                email = ?6,
                status = ?7,
                profile = ?8,
                links = ?9,
                details_synced = ?10,
                details_synced_at = ?11,
                remote_created_at = ?12,
                portal_password_set = ?13,
                connection_password_set = ?14,
                last_write_origin = ?15,
                last_provision_error = ?16,
                updated_at = ?17
            WHERE local_id = ?1
            "#,
        )
        .bind(&sub.local_id)
        .bind(sub.external_id)
        .bind(&sub.username)
        .bind(&sub.full_name)
        .bind(&sub.phone)
        .bind(&sub.email)
        .bind(sub.status.as_str())
        .bind(profile)
        .bind(links)
        .bind(sub.details_synced)
        .bind(sub.details_synced_at)
        .bind(sub.remote_created_at)
        .bind(sub.portal_password_set)
        .bind(sub.connection_password_set)
        .bind(origin)
        .bind(&sub.last_provision_error)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Subscriber", &sub.local_id));
        }

        replace_roster(&mut tx, &sub.local_id, &sub.documents).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    /// Writes a few named columns, leaving everything else as stored.
    ///
    /// This is the narrow write path of the saga and the reconcilers: it
    /// never goes through the lifecycle layer, so it cannot fire remote
    /// effects.
    pub async fn set_fields(
        &self,
        local_id: &str,
        fields: &[SubscriberField],
        origin: OperationOrigin,
    ) -> DbResult<()> {
        debug!(
            local_id = %local_id,
            origin = %origin,
            count = fields.len(),
            "Setting subscriber fields"
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE subscribers SET last_write_origin = ?2, updated_at = ?3 WHERE local_id = ?1",
        )
        .bind(local_id)
        .bind(origin)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Subscriber", local_id));
        }

        for field in fields {
            let query = match field {
                SubscriberField::ExternalId(id) => {
                    sqlx::query("UPDATE subscribers SET external_id = ?2 WHERE local_id = ?1")
                        .bind(local_id)
                        .bind(*id)
                }
                SubscriberField::Username(username) => {
                    sqlx::query("UPDATE subscribers SET username = ?2 WHERE local_id = ?1")
                        .bind(local_id)
                        .bind(username.clone())
                }
                SubscriberField::RemoteCreatedAt(at) => {
                    sqlx::query("UPDATE subscribers SET remote_created_at = ?2 WHERE local_id = ?1")
                        .bind(local_id)
                        .bind(*at)
                }
                SubscriberField::ProvisionError(message) => sqlx::query(
                    "UPDATE subscribers SET last_provision_error = ?2 WHERE local_id = ?1",
                )
                .bind(local_id)
                .bind(message.clone()),
                SubscriberField::PortalPasswordSet(set) => sqlx::query(
                    "UPDATE subscribers SET portal_password_set = ?2 WHERE local_id = ?1",
                )
                .bind(local_id)
                .bind(*set),
                SubscriberField::ConnectionPasswordSet(set) => sqlx::query(
                    "UPDATE subscribers SET connection_password_set = ?2 WHERE local_id = ?1",
                )
                .bind(local_id)
                .bind(*set),
                SubscriberField::DetailsSynced { synced, at } => sqlx::query(
                    "UPDATE subscribers SET details_synced = ?2, details_synced_at = ?3 WHERE local_id = ?1",
                )
                .bind(local_id)
                .bind(*synced)
                .bind(*at),
            };
            query.execute(&mut *tx).await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    /// Deletes a subscriber; the roster goes with it (ON DELETE CASCADE).
    /// Returns false if it did not exist.
    pub async fn delete(&self, local_id: &str) -> DbResult<bool> {
        debug!(local_id = %local_id, "Deleting subscriber");
        let result = sqlx::query("DELETE FROM subscribers WHERE local_id = ?1")
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

enum SubscriberKey<'a> {
    Local(&'a str),
    External(i64),
}

// =============================================================================
// Unit Tests
// =============================================================================
