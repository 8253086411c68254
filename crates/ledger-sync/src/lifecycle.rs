//! # Subscriber Lifecycle
//!
//! Entry points for local mutations. Every call takes an
//! [`OperationContext`]; only `UserInitiated` reaches the backend.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          create / save / delete                         │
//! │                                   │                                     │
//! │                     ┌─────────────┴──────────────┐                      │
//! │                     ▼                            ▼                      │
//! │            origin = UserInitiated      origin = Reconciliation /        │
//! │                     │                           BackgroundJob           │
//! │                     ▼                            │                      │
//! │   create: insert → saga                          ▼                      │
//! │   update: analyze → push_update → save    ledger write only             │
//! │           → uploads (best-effort)         (zero remote calls)           │
//! │   delete: remote delete (logged) → local                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Create and update surface remote failures to the caller. Delete never
//! lets a remote failure block the local deletion.

use tracing::{debug, info, warn};

use ledger_core::changes::analyze;
use ledger_core::validation::{apply_create_defaults, validate_for_create, validate_for_update};
use ledger_core::{
    Actor, CorrelatedLink, OperationContext, SaveAnalysis, SecretInput,
    Subscriber, SubscriberInput,
};
use ledger_db::Database;

use crate::correlation::CorrelationResolver;
use crate::documents::UploadReport;
use crate::error::{SyncError, SyncResult};
use crate::saga::{ProvisionOutcome, Provisioner};

/// What a save did.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub analysis: SaveAnalysis,
    /// Set when a new record was provisioned.
    pub provisioned: Option<ProvisionOutcome>,
    /// Uploads run after an update.
    pub uploads: Option<UploadReport>,
}

#[derive(Debug, Clone)]
pub struct SubscriberService {
    db: Database,
    correlations: CorrelationResolver,
    provisioner: Provisioner,
}

impl SubscriberService {
    pub fn new(db: Database, correlations: CorrelationResolver, provisioner: Provisioner) -> Self {
        SubscriberService {
            db,
            correlations,
            provisioner,
        }
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Creates a record locally and, for user-initiated calls, provisions it.
    ///
    /// The local insert comes first: if it fails, nothing remote was ever
    /// created. A saga failure leaves the local record in place.
    pub async fn create(&self, input: SubscriberInput, ctx: &OperationContext) -> SyncResult<SaveOutcome> {
        let SubscriberInput { mut record, secrets } = input;

        if self.db.subscribers().exists(&record.local_id).await? {
            return Err(SyncError::precondition(format!(
                "subscriber '{}' already exists",
                record.local_id
            )));
        }

        if ctx.origin.fires_remote_effects() {
            apply_create_defaults(&mut record);
            self.fill_salesperson(&mut record, &ctx.actor).await?;
            let unresolved = self.correlations.refresh_links(&mut record).await?;
            if !unresolved.is_empty() {
                debug!(local_id = %record.local_id, unresolved = ?unresolved, "Links without correlation");
            }
            validate_for_create(&record, &secrets)?;
        }

        let analysis = analyze(None, &SubscriberInput::new(record.clone()).with_secrets(secrets.clone()));
        self.db.subscribers().insert(&record, ctx.origin).await?;
        info!(local_id = %record.local_id, origin = %ctx.origin, "Subscriber created locally");

        if !ctx.origin.fires_remote_effects() {
            return Ok(SaveOutcome {
                analysis,
                provisioned: None,
                uploads: None,
            });
        }

        let stored = self.db.subscribers().get_required(&record.local_id).await?;
        let outcome = self.provisioner.provision(&stored, &secrets, &ctx.actor).await?;

        Ok(SaveOutcome {
            analysis,
            provisioned: Some(outcome),
            uploads: None,
        })
    }

    /// Uses the acting user's salesperson when none is chosen; its branch
    /// fills an empty branch.
    async fn fill_salesperson(&self, record: &mut Subscriber, actor: &Actor) -> SyncResult<()> {
        if record.links.salesperson.is_some() || actor.login.is_empty() {
            return Ok(());
        }
        let Some(entry) = self.correlations.salesperson_for_login(&actor.login).await? else {
            return Ok(());
        };

        debug!(local_id = %record.local_id, salesperson = %entry.local_id, "Salesperson filled from acting user");
        record.links.salesperson = Some(entry.as_link());
        if record.links.branch.is_none() {
            if let Some(branch) = entry.parent_branch_local_id.clone() {
                record.links.branch = Some(CorrelatedLink::local(branch));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Save
    // =========================================================================

    /// Inserts or updates a record.
    ///
    /// For an existing provisioned record edited by a user the remote push
    /// runs first; the local save only happens once the backend accepted it.
    pub async fn save(&self, input: SubscriberInput, ctx: &OperationContext) -> SyncResult<SaveOutcome> {
        let previous = self.db.subscribers().get(&input.record.local_id).await?;
        let Some(previous) = previous else {
            return self.create(input, ctx).await;
        };

        let SubscriberInput { mut record, secrets } = input;
        let analysis = analyze(
            Some(&previous),
            &SubscriberInput::new(record.clone()).with_secrets(secrets),
        );

        if !ctx.origin.fires_remote_effects() {
            self.db.subscribers().save(&record, ctx.origin).await?;
            debug!(local_id = %record.local_id, origin = %ctx.origin, "Subscriber saved without remote effects");
            return Ok(SaveOutcome {
                analysis,
                provisioned: None,
                uploads: None,
            });
        }

        if previous.external_id.is_none() {
            // Never provisioned: the edit stays local until a retry.
            self.db.subscribers().save(&record, ctx.origin).await?;
            warn!(local_id = %record.local_id, "Saved an unprovisioned subscriber; use retry to provision");
            return Ok(SaveOutcome {
                analysis,
                provisioned: None,
                uploads: None,
            });
        }

        record.external_id = previous.external_id;
        self.correlations.refresh_links(&mut record).await?;
        validate_for_update(&record)?;

        self.provisioner
            .push_update(&record, &analysis, &ctx.actor)
            .await?;
        if analysis.secrets.portal_password.is_some() {
            record.portal_password_set = true;
        }
        if analysis.secrets.connection_password.is_some() {
            record.connection_password_set = true;
        }

        self.db.subscribers().save(&record, ctx.origin).await?;
        info!(local_id = %record.local_id, "Subscriber updated");

        let uploads = if analysis.has_pending_documents {
            let stored = self.db.subscribers().get_required(&record.local_id).await?;
            match self.provisioner.upload_documents(&stored, &ctx.actor).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(local_id = %record.local_id, error = %e, "Document uploads skipped");
                    None
                }
            }
        } else {
            None
        };

        Ok(SaveOutcome {
            analysis,
            provisioned: None,
            uploads,
        })
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Deletes a record. Returns false if it did not exist.
    pub async fn delete(&self, local_id: &str, ctx: &OperationContext) -> SyncResult<bool> {
        let Some(sub) = self.db.subscribers().get(local_id).await? else {
            return Ok(false);
        };

        if ctx.origin.fires_remote_effects() && sub.external_id.is_some() {
            if let Err(e) = self.provisioner.delete_remote(&sub).await {
                warn!(local_id = %local_id, error = %e, "Remote delete failed, deleting locally anyway");
            }
        }

        let deleted = self.db.subscribers().delete(local_id).await?;
        info!(local_id = %local_id, origin = %ctx.origin, state = "deleted", "Subscriber deleted");
        Ok(deleted)
    }

    // =========================================================================
    // Retry
    // =========================================================================

    /// Runs the saga again for a record left `LocalOnly` by a failed attempt.
    pub async fn retry_provisioning(
        &self,
        local_id: &str,
        secrets: &SecretInput,
        actor: &Actor,
    ) -> SyncResult<ProvisionOutcome> {
        let mut sub = self.db.subscribers().get_required(local_id).await?;
        if sub.external_id.is_some() {
            return Err(SyncError::precondition(format!(
                "subscriber '{}' is already provisioned",
                local_id
            )));
        }

        self.correlations.refresh_links(&mut sub).await?;
        validate_for_create(&sub, secrets)?;

        info!(local_id = %local_id, "Retrying provisioning");
        self.provisioner.provision(&sub, secrets, actor).await
    }
}
