//! # Provisioning Saga
//!
//! Creates a subscriber on the backend in a fixed sequence of remote calls,
//! compensating with a remote delete when a later step fails.
//!
//! ## Step Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. POST /subscribers            (temporary secret, createdBy block)   │
//! │        │ external id + canonical username                              │
//! │        ▼                                                                │
//! │  2. set_fields(external_id, ...)  ReconciliationSync, no lifecycle     │
//! │        ▼                                                                │
//! │  3. PUT  /subscribers/{id}/reset-password   (real secrets)             │
//! │        ▼                                                                │
//! │  4. PUT  /radcheck/username/{u}/expiration  (only if returned)         │
//! │        ▼                                                                │
//! │  5. GET  /packages/{plan} → POST /radusergroup  (only if group found)  │
//! │        ▼                                                                │
//! │  6. POST /subscriber-services   "Subscribed to {plan}"                 │
//! │        ▼                                                                │
//! │  7. POST /documents  per pending row (best-effort, never compensates)  │
//! │                                                                         │
//! │  failure in 2..=6 ──► DELETE /subscribers/{id}  (404 = already gone)   │
//! │                        then surface SyncError::Provisioning             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The local record is never deleted here. It was inserted before step 1,
//! so a failure leaves it `LocalOnly` (compensated) or `Provisioned` with
//! the error recorded (compensation itself failed).
//!
//! The same type also carries the strict half of the update path and the
//! best-effort remote delete.

use chrono::Utc;
use chrono_tz::Tz;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, error, info, warn};

use ledger_core::mapper::{self, CreatedSubscriber, PayloadContext, PayloadMode, UploadOwner};
use ledger_core::{
    Actor, CorrelationEntry, CorrelationKind, OperationOrigin, SaveAnalysis, SecretInput,
    Subscriber, TEMPORARY_SECRET_SUFFIX_LEN,
};
use ledger_db::{Database, SubscriberField};

use crate::config::EngineConfig;
use crate::correlation::CorrelationResolver;
use crate::documents::{DocumentSynchronizer, UploadReport};
use crate::error::{SyncError, SyncResult};
use crate::gateway::DeleteOutcome;
use crate::remote::RemoteApi;

// =============================================================================
// Settings / Outcome
// =============================================================================

/// Scope defaults and display settings the saga needs.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub default_isp_id: Option<i64>,
    pub default_branch_id: Option<i64>,
    /// Timezone used for RADIUS expiration strings and history stamps.
    pub timezone: Tz,
}

impl ProvisionSettings {
    pub fn from_config(config: &EngineConfig) -> SyncResult<Self> {
        Ok(ProvisionSettings {
            default_isp_id: config.scope.isp_id,
            default_branch_id: config.scope.branch_id,
            timezone: config.sync.timezone()?,
        })
    }
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        ProvisionSettings {
            default_isp_id: None,
            default_branch_id: None,
            timezone: Tz::UTC,
        }
    }
}

/// The saga steps that run before uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    CreateSubscriber,
    PersistExternalId,
    ResetSecrets,
    SetExpiration,
    BindPolicyGroup,
    RecordServiceHistory,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::CreateSubscriber => "create_subscriber",
            SagaStep::PersistExternalId => "persist_external_id",
            SagaStep::ResetSecrets => "reset_secrets",
            SagaStep::SetExpiration => "set_expiration",
            SagaStep::BindPolicyGroup => "bind_policy_group",
            SagaStep::RecordServiceHistory => "record_service_history",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful saga.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub external_id: i64,
    /// Canonical username as returned by the backend.
    pub username: String,
    pub uploads: UploadReport,
}

/// Throwaway portal secret sent with the create call. The real secrets
/// replace it in step 3.
pub fn temporary_secret() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMPORARY_SECRET_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("TEMP-{}", suffix)
}

// =============================================================================
// Provisioner
// =============================================================================

#[derive(Debug, Clone)]
pub struct Provisioner {
    api: RemoteApi,
    db: Database,
    correlations: CorrelationResolver,
    documents: DocumentSynchronizer,
    settings: ProvisionSettings,
}

impl Provisioner {
    pub fn new(
        api: RemoteApi,
        db: Database,
        correlations: CorrelationResolver,
        documents: DocumentSynchronizer,
        settings: ProvisionSettings,
    ) -> Self {
        Provisioner {
            api,
            db,
            correlations,
            documents,
            settings,
        }
    }

    async fn salesperson(&self, sub: &Subscriber) -> SyncResult<Option<CorrelationEntry>> {
        match sub.links.local_id(CorrelationKind::Salesperson) {
            Some(local_id) => {
                self.correlations
                    .entry(CorrelationKind::Salesperson, local_id)
                    .await
            }
            None => Ok(None),
        }
    }

    fn payload_context<'a>(
        &self,
        mode: PayloadMode,
        salesperson: Option<&'a CorrelationEntry>,
        actor: &'a Actor,
    ) -> PayloadContext<'a> {
        PayloadContext {
            mode,
            salesperson,
            default_isp_id: self.settings.default_isp_id,
            default_branch_id: self.settings.default_branch_id,
            actor,
        }
    }

    fn local_now(&self) -> chrono::NaiveDateTime {
        Utc::now().with_timezone(&self.settings.timezone).naive_local()
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Runs the saga for a record that is already stored locally.
    ///
    /// ## Errors
    /// - `Validation` if the record already has an external id
    /// - `Provisioning` for any failure in steps 1-6, after compensation
    pub async fn provision(
        &self,
        sub: &Subscriber,
        secrets: &SecretInput,
        actor: &Actor,
    ) -> SyncResult<ProvisionOutcome> {
        if sub.external_id.is_some() {
            return Err(SyncError::precondition(format!(
                "subscriber '{}' is already provisioned",
                sub.local_id
            )));
        }

        info!(local_id = %sub.local_id, state = "provisioning", "Starting provisioning saga");

        let salesperson = self.salesperson(sub).await?;
        let ctx = self.payload_context(PayloadMode::Create, salesperson.as_ref(), actor);
        let payload = mapper::with_create_secrets(
            mapper::build_subscriber_payload(sub, &ctx),
            &temporary_secret(),
            secrets,
        );

        // Step 1: nothing exists remotely until this succeeds.
        let created = match self.api.create_subscriber(&payload).await {
            Ok(created) => created,
            Err(e) => {
                error!(local_id = %sub.local_id, error = %e, "Remote create failed");
                self.record_error(&sub.local_id, &e.to_string()).await;
                return Err(SyncError::Provisioning {
                    step: SagaStep::CreateSubscriber.to_string(),
                    message: e.to_string(),
                    compensated: false,
                });
            }
        };

        let username = created
            .username
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| sub.username.clone());

        if let Err((step, e)) = self
            .complete_remote_setup(sub, &created, &username, secrets, salesperson.as_ref(), actor)
            .await
        {
            let restore_username = (username != sub.username).then_some(sub.username.as_str());
            return Err(self
                .compensate(&sub.local_id, created.external_id, restore_username, step, e)
                .await);
        }

        info!(
            local_id = %sub.local_id,
            external_id = created.external_id,
            username = %username,
            "Subscriber provisioned"
        );

        // Step 7: best-effort.
        let mut provisioned = sub.clone();
        provisioned.external_id = Some(created.external_id);
        provisioned.username = username.clone();
        let uploads = match self.upload_documents(&provisioned, actor).await {
            Ok(report) => report,
            Err(e) => {
                warn!(local_id = %sub.local_id, error = %e, "Document uploads skipped");
                UploadReport::default()
            }
        };

        Ok(ProvisionOutcome {
            external_id: created.external_id,
            username,
            uploads,
        })
    }

    /// Steps 2 through 6. The failing step is returned with its error.
    async fn complete_remote_setup(
        &self,
        sub: &Subscriber,
        created: &CreatedSubscriber,
        username: &str,
        secrets: &SecretInput,
        salesperson: Option<&CorrelationEntry>,
        actor: &Actor,
    ) -> Result<(), (SagaStep, SyncError)> {
        let external_id = created.external_id;

        // Step 2
        let mut fields = vec![
            SubscriberField::ExternalId(Some(external_id)),
            SubscriberField::RemoteCreatedAt(created.created_at),
            SubscriberField::ProvisionError(None),
        ];
        if username != sub.username {
            info!(local_id = %sub.local_id, from = %sub.username, to = %username, "Adopting canonical username");
            fields.push(SubscriberField::Username(username.to_string()));
        }
        self.db
            .subscribers()
            .set_fields(&sub.local_id, &fields, OperationOrigin::ReconciliationSync)
            .await
            .map_err(|e| (SagaStep::PersistExternalId, e.into()))?;

        // Step 3
        match mapper::password_reset_body(username, secrets) {
            Some(body) => self
                .api
                .reset_password(external_id, &body)
                .await
                .map_err(|e| (SagaStep::ResetSecrets, e))?,
            None => debug!(local_id = %sub.local_id, "No secrets entered, skipping reset"),
        }

        // Step 4
        if let Some(raw) = created.expiration.as_deref() {
            match mapper::format_radius_datetime(raw, self.settings.timezone) {
                Some(formatted) => self
                    .api
                    .set_expiration(username, &formatted)
                    .await
                    .map_err(|e| (SagaStep::SetExpiration, e))?,
                None => warn!(local_id = %sub.local_id, raw = %raw, "Unparseable expiration, skipping"),
            }
        }

        let plan = sub.links.get(CorrelationKind::Plan).cloned();
        let plan_external_id = plan.as_ref().and_then(|p| p.external_id);

        // Step 5
        if let Some(plan_id) = plan_external_id {
            let definition = self
                .api
                .get_plan(plan_id)
                .await
                .map_err(|e| (SagaStep::BindPolicyGroup, e))?;
            match mapper::policy_group_from_plan(&definition) {
                Some(group) => self
                    .api
                    .bind_policy_group(username, &group)
                    .await
                    .map_err(|e| (SagaStep::BindPolicyGroup, e))?,
                None => debug!(plan_id, "Plan has no policy group"),
            }
        }

        // Step 6
        if let (Some(plan), Some(plan_id)) = (plan.as_ref(), plan_external_id) {
            let body = mapper::service_history_body(
                external_id,
                plan_id,
                &format!("Subscribed to {}", plan.local_id),
                mapper::provenance(salesperson, actor),
                self.local_now(),
            );
            self.api
                .record_service_history(&body)
                .await
                .map_err(|e| (SagaStep::RecordServiceHistory, e))?;
        }

        let secrets = secrets.non_blank();
        let mut flags = Vec::new();
        if secrets.portal_password.is_some() {
            flags.push(SubscriberField::PortalPasswordSet(true));
        }
        if secrets.connection_password.is_some() {
            flags.push(SubscriberField::ConnectionPasswordSet(true));
        }
        if !flags.is_empty() {
            self.db
                .subscribers()
                .set_fields(&sub.local_id, &flags, OperationOrigin::ReconciliationSync)
                .await
                .map_err(|e| (SagaStep::ResetSecrets, e.into()))?;
        }

        Ok(())
    }

    /// Removes the remote subscriber again and reports the failed step.
    async fn compensate(
        &self,
        local_id: &str,
        external_id: i64,
        restore_username: Option<&str>,
        step: SagaStep,
        cause: SyncError,
    ) -> SyncError {
        error!(
            local_id = %local_id,
            external_id,
            step = %step,
            error = %cause,
            "Provisioning step failed, compensating"
        );
        let message = cause.to_string();

        let compensated = match self.api.delete_subscriber(external_id).await {
            Ok(outcome) => {
                if outcome == DeleteOutcome::AlreadyGone {
                    debug!(external_id, "Remote subscriber was already gone");
                }
                let mut fields = vec![
                    SubscriberField::ExternalId(None),
                    SubscriberField::RemoteCreatedAt(None),
                    SubscriberField::ProvisionError(Some(format!("{}: {}", step, message))),
                ];
                // The adopted name belonged to the deleted remote record.
                if let Some(original) = restore_username {
                    fields.push(SubscriberField::Username(original.to_string()));
                }
                if let Err(e) = self
                    .db
                    .subscribers()
                    .set_fields(local_id, &fields, OperationOrigin::ReconciliationSync)
                    .await
                {
                    error!(local_id = %local_id, error = %e, "Failed to clear external id after compensation");
                }
                true
            }
            Err(e) => {
                // The remote record still exists; keep its id so a retry
                // never creates a second one.
                error!(local_id = %local_id, external_id, error = %e, "Compensating delete failed");
                self.record_error(
                    local_id,
                    &format!("{}: {} (compensation failed: {})", step, message, e),
                )
                .await;
                false
            }
        };

        SyncError::Provisioning {
            step: step.to_string(),
            message,
            compensated,
        }
    }

    async fn record_error(&self, local_id: &str, message: &str) {
        let fields = [SubscriberField::ProvisionError(Some(message.to_string()))];
        if let Err(e) = self
            .db
            .subscribers()
            .set_fields(local_id, &fields, OperationOrigin::ReconciliationSync)
            .await
        {
            error!(local_id = %local_id, error = %e, "Failed to record provisioning error");
        }
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Pushes an edit of a provisioned record. Runs before the local save so
    /// a rejected edit never lands in the ledger.
    ///
    /// Order: full PUT, secret reset, service history on plan change,
    /// deletes for documents removed from the roster.
    pub async fn push_update(
        &self,
        sub: &Subscriber,
        analysis: &SaveAnalysis,
        actor: &Actor,
    ) -> SyncResult<()> {
        let external_id = sub.external_id.ok_or_else(|| {
            SyncError::precondition(format!("subscriber '{}' has no external id", sub.local_id))
        })?;

        let salesperson = self.salesperson(sub).await?;
        let ctx = self.payload_context(PayloadMode::Update, salesperson.as_ref(), actor);
        self.api
            .update_subscriber(external_id, &mapper::build_subscriber_payload(sub, &ctx))
            .await?;
        debug!(local_id = %sub.local_id, external_id, "Remote subscriber updated");

        if analysis.needs_secret_reset() {
            if let Some(body) = mapper::password_reset_body(&sub.username, &analysis.secrets) {
                self.api.reset_password(external_id, &body).await?;
            }
        }

        if analysis.plan_changed {
            if let Some(plan_id) = sub.links.external_id(CorrelationKind::Plan) {
                let body = mapper::service_history_body(
                    external_id,
                    plan_id,
                    "Package updated",
                    mapper::provenance(salesperson.as_ref(), actor),
                    self.local_now(),
                );
                self.api.record_service_history(&body).await?;
            }
        }

        if !analysis.removed_remote_document_ids.is_empty() {
            self.documents
                .delete_remote_documents(&analysis.removed_remote_document_ids)
                .await?;
        }

        Ok(())
    }

    // =========================================================================
    // Uploads / Delete
    // =========================================================================

    /// Uploads every pending row of a provisioned record.
    pub async fn upload_documents(&self, sub: &Subscriber, actor: &Actor) -> SyncResult<UploadReport> {
        let external_id = sub.external_id.ok_or_else(|| {
            SyncError::precondition(format!("subscriber '{}' has no external id", sub.local_id))
        })?;

        let salesperson = self.salesperson(sub).await?;
        let ctx = self.payload_context(PayloadMode::Update, salesperson.as_ref(), actor);
        let (uploaded_by_id, uploaded_by_username) = mapper::provenance(salesperson.as_ref(), actor);
        let owner = UploadOwner {
            subscriber_id: external_id,
            subscriber_username: sub.username.clone(),
            uploaded_by_id,
            uploaded_by_username,
            isp_id: mapper::resolve_isp_id(sub, &ctx),
            branch_id: mapper::resolve_branch_id(sub, &ctx),
        };

        Ok(self.documents.upload_pending(sub, &owner).await)
    }

    /// Removes the remote subscriber. 404 counts as success.
    pub async fn delete_remote(&self, sub: &Subscriber) -> SyncResult<DeleteOutcome> {
        let external_id = sub.external_id.ok_or_else(|| {
            SyncError::precondition(format!("subscriber '{}' has no external id", sub.local_id))
        })?;
        let outcome = self.api.delete_subscriber(external_id).await?;
        info!(local_id = %sub.local_id, external_id, outcome = ?outcome, "Remote subscriber deleted");
        Ok(outcome)
    }
}
