//! # Subscriber Actions and Pipeline Triggers
//!
//! One-shot operations a user runs against a provisioned subscriber, plus
//! the entry points that start reconciliation.
//!
//! | Action | Remote call | Follow-up |
//! |--------|-------------|-----------|
//! | reset passwords | `PUT /subscribers/{id}/reset-password` | flags on the record |
//! | disconnect | `POST /radacct/disconnect` | none |
//! | disable / enable net | `POST /radcheck/{disable,enable}-net` | none |
//! | disable / enable profile | `PUT /subscribers/{id}/{disable,enable}-profile` | detail refresh |
//! | revoke recharge | `POST /subscribers/{id}/revoke-recharge` | detail refresh |

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use ledger_core::{mapper, OperationOrigin, SecretInput, Subscriber, ValidationError};
use ledger_db::{Database, SubscriberField};

use crate::config::JobSettings;
use crate::detail_reconciler::{DetailReconciler, DetailSyncReport};
use crate::error::{SyncError, SyncResult};
use crate::jobs::{EnqueuedJob, JobScheduler, SyncJobKind, LONG_QUEUE};
use crate::list_reconciler::{ListReconciler, ListSyncReport};
use crate::remote::RemoteApi;

#[derive(Debug, Clone)]
pub struct SubscriberActions {
    api: RemoteApi,
    db: Database,
    details: DetailReconciler,
    list: ListReconciler,
    scheduler: Arc<dyn JobScheduler>,
    jobs: JobSettings,
}

impl SubscriberActions {
    pub fn new(
        api: RemoteApi,
        db: Database,
        details: DetailReconciler,
        list: ListReconciler,
        scheduler: Arc<dyn JobScheduler>,
        jobs: JobSettings,
    ) -> Self {
        SubscriberActions {
            api,
            db,
            details,
            list,
            scheduler,
            jobs,
        }
    }

    async fn provisioned(&self, local_id: &str) -> SyncResult<(Subscriber, i64)> {
        let sub = self.db.subscribers().get_required(local_id).await?;
        match sub.external_id {
            Some(external_id) => Ok((sub, external_id)),
            None => Err(SyncError::precondition(format!(
                "subscriber '{}' has not been provisioned",
                local_id
            ))),
        }
    }

    async fn refresh_after_action(&self, local_id: &str) {
        if let Err(e) = self.details.sync_details(local_id).await {
            warn!(local_id = %local_id, error = %e, "Refresh after action failed");
        }
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Resets the portal and/or connection password. At least one must be
    /// entered.
    pub async fn reset_passwords(&self, local_id: &str, secrets: &SecretInput) -> SyncResult<()> {
        let (sub, external_id) = self.provisioned(local_id).await?;
        let body = mapper::password_reset_body(&sub.username, secrets).ok_or_else(|| {
            SyncError::Validation(ValidationError::required("portal_password or connection_password"))
        })?;

        self.api.reset_password(external_id, &body).await?;

        let secrets = secrets.non_blank();
        let mut fields = Vec::new();
        if secrets.portal_password.is_some() {
            fields.push(SubscriberField::PortalPasswordSet(true));
        }
        if secrets.connection_password.is_some() {
            fields.push(SubscriberField::ConnectionPasswordSet(true));
        }
        self.db
            .subscribers()
            .set_fields(local_id, &fields, OperationOrigin::ReconciliationSync)
            .await?;

        info!(local_id = %local_id, external_id, "Passwords reset");
        Ok(())
    }

    // =========================================================================
    // Session / Network
    // =========================================================================

    pub async fn disconnect(&self, local_id: &str) -> SyncResult<()> {
        let (sub, _) = self.provisioned(local_id).await?;
        self.api.disconnect_session(&sub.username).await?;
        info!(local_id = %local_id, username = %sub.username, "Session disconnected");
        Ok(())
    }

    pub async fn set_network_enabled(&self, local_id: &str, enabled: bool) -> SyncResult<()> {
        let (sub, _) = self.provisioned(local_id).await?;
        self.api.set_network_enabled(&sub.username, enabled).await?;
        info!(local_id = %local_id, enabled, "Network access changed");
        Ok(())
    }

    // =========================================================================
    // Profile / Recharge
    // =========================================================================

    pub async fn set_profile_enabled(&self, local_id: &str, enabled: bool) -> SyncResult<()> {
        let (_, external_id) = self.provisioned(local_id).await?;
        self.api.set_profile_enabled(external_id, enabled).await?;
        info!(local_id = %local_id, external_id, enabled, "Profile state changed");
        self.refresh_after_action(local_id).await;
        Ok(())
    }

    pub async fn revoke_recharge(&self, local_id: &str) -> SyncResult<()> {
        let (_, external_id) = self.provisioned(local_id).await?;
        self.api.revoke_recharge(external_id).await?;
        info!(local_id = %local_id, external_id, "Recharge revoked");
        self.refresh_after_action(local_id).await;
        Ok(())
    }

    // =========================================================================
    // Pipeline Triggers
    // =========================================================================

    /// List sweep, then the bulk detail job in the background.
    pub async fn sync_list_and_enqueue_bulk_details(
        &self,
        page_size: usize,
    ) -> SyncResult<(ListSyncReport, EnqueuedJob)> {
        let report = self.list.sync_list(page_size).await?;
        let job = self
            .scheduler
            .enqueue(
                SyncJobKind::SyncAllDetails,
                LONG_QUEUE,
                Duration::from_secs(self.jobs.bulk_details_timeout_secs),
            )
            .await?;
        Ok((report, job))
    }

    /// Queues the list sweep itself.
    pub async fn enqueue_list_sync(&self, page_size: usize) -> SyncResult<EnqueuedJob> {
        self.scheduler
            .enqueue(
                SyncJobKind::SyncList { page_size },
                LONG_QUEUE,
                Duration::from_secs(self.jobs.list_timeout_secs),
            )
            .await
    }

    /// Background refresh of one subscriber, e.g. when its record is opened.
    pub async fn enqueue_subscriber_details(&self, local_id: &str) -> SyncResult<EnqueuedJob> {
        self.provisioned(local_id).await?;
        self.scheduler
            .enqueue(
                SyncJobKind::SyncDetails {
                    local_id: local_id.to_string(),
                },
                LONG_QUEUE,
                Duration::from_secs(self.jobs.single_details_timeout_secs),
            )
            .await
    }

    /// Synchronous refresh of one subscriber.
    pub async fn refresh_subscriber_now(&self, local_id: &str) -> SyncResult<DetailSyncReport> {
        self.provisioned(local_id).await?;
        self.details.sync_details(local_id).await
    }
}
