//! # Domain Types
//!
//! Core domain types used throughout the subscriber ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐            │
//! │  │     Subscriber       │ 1──* │   DocumentAttachment     │            │
//! │  │  ──────────────────  │      │  ──────────────────────  │            │
//! │  │  local_id (human)    │      │  row_id (UUID)           │            │
//! │  │  external_id (remote)│      │  file_path (pending)     │            │
//! │  │  profile (mirror)    │      │  remote_document_id      │            │
//! │  │  links (Linkage)     │      │  uploaded / error        │            │
//! │  └──────────┬───────────┘      └──────────────────────────┘            │
//! │             │                                                           │
//! │             ▼                                                           │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐            │
//! │  │  CorrelatedLink × 7  │      │  OperationContext        │            │
//! │  │  local_id + cached   │      │  origin + actor          │            │
//! │  │  external_id         │      │  (anti-loop marker)      │            │
//! │  └──────────────────────┘      └──────────────────────────┘            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every subscriber has:
//! - `local_id`: human-assigned, unique in the ledger, never sent to the backend
//! - `external_id`: assigned by the backend on create, null until then

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codes::{ConnectionType, DiscountType, IdProofType, ProfileStatus};

// =============================================================================
// Operation Origin (anti-loop marker)
// =============================================================================

/// Where a write to the ledger came from.
///
/// ## Why It Exists
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  UserInitiated        → save fires the remote saga / update / delete   │
/// │  ReconciliationSync   → mirror write from a remote read; no side effect│
/// │  BackgroundJob        → job bookkeeping; no side effect                │
/// │                                                                         │
/// │  Without this, a reconciliation write would look like a user edit and  │
/// │  PUT the same data straight back to the backend (sync ↔ mutate loop).  │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OperationOrigin {
    /// A human or API caller asked for this change.
    UserInitiated,
    /// Written while mirroring remote state into the ledger.
    ReconciliationSync,
    /// Written by a background job outside any user request.
    BackgroundJob,
}

impl OperationOrigin {
    /// Returns true if a save with this origin must run remote side effects.
    pub fn fires_remote_effects(&self) -> bool {
        matches!(self, OperationOrigin::UserInitiated)
    }

    /// Returns true if this origin carries the anti-loop marker.
    pub fn is_anti_loop(&self) -> bool {
        !self.fires_remote_effects()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationOrigin::UserInitiated => "user_initiated",
            OperationOrigin::ReconciliationSync => "reconciliation_sync",
            OperationOrigin::BackgroundJob => "background_job",
        }
    }
}

impl std::fmt::Display for OperationOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The person (or system) a mutation is performed for.
///
/// `remote_user_id` / `remote_username` feed the `createdBy` / `actionBy`
/// provenance fields when no salesperson is linked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Local login of the acting user ("system" for jobs).
    pub login: String,
    pub remote_user_id: Option<i64>,
    pub remote_username: Option<String>,
}

impl Actor {
    pub fn new(login: impl Into<String>) -> Self {
        Actor {
            login: login.into(),
            remote_user_id: None,
            remote_username: None,
        }
    }

    pub fn system() -> Self {
        Actor::new("system")
    }

    pub fn with_remote_identity(mut self, user_id: Option<i64>, username: Option<String>) -> Self {
        self.remote_user_id = user_id;
        self.remote_username = username;
        self
    }
}

/// Typed operation context passed into every lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub origin: OperationOrigin,
    pub actor: Actor,
}

impl OperationContext {
    /// Context for a user-facing mutation.
    pub fn user(actor: Actor) -> Self {
        OperationContext {
            origin: OperationOrigin::UserInitiated,
            actor,
        }
    }

    /// Context for a mirror write performed by a reconciler.
    pub fn reconciliation() -> Self {
        OperationContext {
            origin: OperationOrigin::ReconciliationSync,
            actor: Actor::system(),
        }
    }

    /// Context for job bookkeeping.
    pub fn background_job() -> Self {
        OperationContext {
            origin: OperationOrigin::BackgroundJob,
            actor: Actor::system(),
        }
    }
}

// =============================================================================
// Mirror State
// =============================================================================

/// Where a subscriber is in its provisioning / mirroring lifecycle.
///
/// ```text
/// LocalOnly ──saga──► Provisioning ──► Provisioned ──detail sync──► DetailsSynced
///     │                    │                                            │
///     │              (failure, compensated)                             │
///     ◄────────────────────┘                                            │
///     └──────────────────────── user delete ────────────────────────► Deleted
/// ```
///
/// Only `LocalOnly`, `Provisioned` and `DetailsSynced` can be derived from a
/// stored record. `Provisioning` lasts for the duration of one saga call and
/// `Deleted` is the outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorState {
    LocalOnly,
    Provisioning,
    Provisioned,
    DetailsSynced,
    Deleted,
}

impl std::fmt::Display for MirrorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MirrorState::LocalOnly => "local_only",
            MirrorState::Provisioning => "provisioning",
            MirrorState::Provisioned => "provisioned",
            MirrorState::DetailsSynced => "details_synced",
            MirrorState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Correlation
// =============================================================================

/// Foreign entities the backend identifies by its own ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    Isp,
    Branch,
    Plan,
    Nas,
    Salesperson,
    IpPool,
    IpAddress,
}

impl CorrelationKind {
    pub const ALL: [CorrelationKind; 7] = [
        CorrelationKind::Isp,
        CorrelationKind::Branch,
        CorrelationKind::Plan,
        CorrelationKind::Nas,
        CorrelationKind::Salesperson,
        CorrelationKind::IpPool,
        CorrelationKind::IpAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationKind::Isp => "isp",
            CorrelationKind::Branch => "branch",
            CorrelationKind::Plan => "plan",
            CorrelationKind::Nas => "nas",
            CorrelationKind::Salesperson => "salesperson",
            CorrelationKind::IpPool => "ip_pool",
            CorrelationKind::IpAddress => "ip_address",
        }
    }

    /// Field carrying this entity's id on the subscriber wire record.
    pub fn wire_field(&self) -> &'static str {
        match self {
            CorrelationKind::Isp => "isp_id",
            CorrelationKind::Branch => "branch_id",
            CorrelationKind::Plan => "package_id",
            CorrelationKind::Nas => "nas_id",
            CorrelationKind::Salesperson => "salesperson_id",
            CorrelationKind::IpPool => "ip_pool_id",
            CorrelationKind::IpAddress => "ip_address_id",
        }
    }
}

impl std::fmt::Display for CorrelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CorrelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CorrelationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown correlation kind: '{}'", s))
    }
}

/// A link from a subscriber to a foreign entity: the local key plus the
/// cached backend id it translated to when last resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedLink {
    pub local_id: String,
    pub external_id: Option<i64>,
}

impl CorrelatedLink {
    pub fn local(local_id: impl Into<String>) -> Self {
        CorrelatedLink {
            local_id: local_id.into(),
            external_id: None,
        }
    }

    pub fn resolved(local_id: impl Into<String>, external_id: i64) -> Self {
        CorrelatedLink {
            local_id: local_id.into(),
            external_id: Some(external_id),
        }
    }
}

/// One row of a correlation table.
///
/// Salesperson rows additionally carry the backend username, the local user
/// login they belong to, and their parent ISP / branch, which drive
/// provenance and create-time auto-fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub kind: CorrelationKind,
    pub local_id: String,
    pub external_id: i64,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub user_login: Option<String>,
    pub parent_isp_external_id: Option<i64>,
    pub parent_branch_local_id: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl CorrelationEntry {
    pub fn new(kind: CorrelationKind, local_id: impl Into<String>, external_id: i64) -> Self {
        CorrelationEntry {
            kind,
            local_id: local_id.into(),
            external_id,
            display_name: None,
            username: None,
            user_login: None,
            parent_isp_external_id: None,
            parent_branch_local_id: None,
            refreshed_at: Utc::now(),
        }
    }

    pub fn as_link(&self) -> CorrelatedLink {
        CorrelatedLink::resolved(self.local_id.clone(), self.external_id)
    }
}

/// Plan/network linkage of a subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linkage {
    pub salesperson: Option<CorrelatedLink>,
    pub plan: Option<CorrelatedLink>,
    pub nas: Option<CorrelatedLink>,
    pub branch: Option<CorrelatedLink>,
    pub isp: Option<CorrelatedLink>,
    pub ip_pool: Option<CorrelatedLink>,
    pub ip_address: Option<CorrelatedLink>,
}

impl Linkage {
    pub fn get(&self, kind: CorrelationKind) -> Option<&CorrelatedLink> {
        match kind {
            CorrelationKind::Isp => self.isp.as_ref(),
            CorrelationKind::Branch => self.branch.as_ref(),
            CorrelationKind::Plan => self.plan.as_ref(),
            CorrelationKind::Nas => self.nas.as_ref(),
            CorrelationKind::Salesperson => self.salesperson.as_ref(),
            CorrelationKind::IpPool => self.ip_pool.as_ref(),
            CorrelationKind::IpAddress => self.ip_address.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, kind: CorrelationKind) -> &mut Option<CorrelatedLink> {
        match kind {
            CorrelationKind::Isp => &mut self.isp,
            CorrelationKind::Branch => &mut self.branch,
            CorrelationKind::Plan => &mut self.plan,
            CorrelationKind::Nas => &mut self.nas,
            CorrelationKind::Salesperson => &mut self.salesperson,
            CorrelationKind::IpPool => &mut self.ip_pool,
            CorrelationKind::IpAddress => &mut self.ip_address,
        }
    }

    /// Cached backend id for a link, if the link is set and resolved.
    pub fn external_id(&self, kind: CorrelationKind) -> Option<i64> {
        self.get(kind).and_then(|link| link.external_id)
    }

    /// Local key for a link, if set.
    pub fn local_id(&self, kind: CorrelationKind) -> Option<&str> {
        self.get(kind).map(|link| link.local_id.as_str())
    }
}

// =============================================================================
// Subscriber
// =============================================================================

/// Network connection status (coarse, list-level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    #[default]
    Inactive,
}

impl ConnectionStatus {
    /// Decodes the backend's `connection_status` ("1" / 1 means active).
    pub fn from_wire_flag(active: bool) -> Self {
        if active {
            ConnectionStatus::Active
        } else {
            ConnectionStatus::Inactive
        }
    }

    pub fn wire_flag(&self) -> i64 {
        match self {
            ConnectionStatus::Active => 1,
            ConnectionStatus::Inactive => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ConnectionStatus::Active),
            "inactive" => Ok(ConnectionStatus::Inactive),
            other => Err(format!("Unknown connection status: '{}'", other)),
        }
    }
}

/// A street / city / zip block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
}

impl Address {
    pub fn new(line: &str, city: &str, zip: &str) -> Self {
        Address {
            line: Some(line.to_string()),
            city: Some(city.to_string()),
            zip: Some(zip.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_none() && self.city.is_none() && self.zip.is_none()
    }
}

/// On/off switches mirrored from the backend (`*_status` = "1").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub auto_renew: bool,
    /// `None` until set, so create can tell "never chosen" from "off".
    pub sms: Option<bool>,
    pub email: Option<bool>,
    pub mac_lock: bool,
    pub lock_volume: bool,
    pub login_log: bool,
    pub lock_session: bool,
    pub portal_login: bool,
}

/// Usage counters owned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaCounters {
    pub total_data: Option<f64>,
    pub used_data: Option<f64>,
    pub total_session: Option<i64>,
    pub used_session: Option<i64>,
}

/// Mirror fields of a subscriber (everything beyond identity and linkage).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriberProfile {
    pub gender: Option<String>,
    pub country: Option<String>,
    pub company: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub billing: Address,
    pub installation: Address,
    pub cpe_ip_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub id_proof_type: Option<IdProofType>,
    pub id_proof_number: Option<String>,
    pub simultaneous_use: Option<i64>,
    pub profile_status: Option<ProfileStatus>,
    pub connection_type: Option<ConnectionType>,
    pub expiration: Option<NaiveDateTime>,
    pub mac_address: Option<String>,
    pub static_ip: Option<String>,
    pub flags: FeatureFlags,
    pub quota: QuotaCounters,
    pub discount_type: Option<DiscountType>,
    pub discount: Option<f64>,
}

/// A subscriber record in the local ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Human-assigned ledger key (defaults to the username on create).
    pub local_id: String,
    /// Backend id; null until the saga's create step succeeds.
    pub external_id: Option<i64>,
    pub username: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: ConnectionStatus,
    pub profile: SubscriberProfile,
    pub links: Linkage,
    pub details_synced: bool,
    pub details_synced_at: Option<DateTime<Utc>>,
    /// Backend's own creation timestamp.
    pub remote_created_at: Option<NaiveDateTime>,
    /// Secrets are write-only; the ledger only remembers that one was set.
    pub portal_password_set: bool,
    pub connection_password_set: bool,
    pub last_write_origin: OperationOrigin,
    /// Message of the last failed provisioning attempt, if any.
    pub last_provision_error: Option<String>,
    pub documents: Vec<DocumentAttachment>,
}

impl Subscriber {
    /// Creates an empty local-only subscriber draft.
    pub fn new(local_id: impl Into<String>, username: impl Into<String>) -> Self {
        Subscriber {
            local_id: local_id.into(),
            external_id: None,
            username: username.into(),
            full_name: String::new(),
            phone: None,
            email: None,
            status: ConnectionStatus::default(),
            profile: SubscriberProfile::default(),
            links: Linkage::default(),
            details_synced: false,
            details_synced_at: None,
            remote_created_at: None,
            portal_password_set: false,
            connection_password_set: false,
            last_write_origin: OperationOrigin::UserInitiated,
            last_provision_error: None,
            documents: Vec::new(),
        }
    }

    /// Derives the persisted mirror state.
    pub fn mirror_state(&self) -> MirrorState {
        match (self.external_id, self.details_synced) {
            (None, _) => MirrorState::LocalOnly,
            (Some(_), false) => MirrorState::Provisioned,
            (Some(_), true) => MirrorState::DetailsSynced,
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.external_id.is_some()
    }

    /// Remote ids of every mirrored attachment row.
    pub fn remote_document_ids(&self) -> Vec<i64> {
        self.documents
            .iter()
            .filter_map(|d| d.remote_document_id)
            .collect()
    }
}

// =============================================================================
// Document Attachment
// =============================================================================

/// An identity/KYC document attached to a subscriber.
///
/// ## Row States
/// ```text
/// pending-local   : remote_document_id = None, file_path = Some
/// remote-mirrored : remote_document_id = Some (file_path may be kept)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAttachment {
    /// Ledger row id (UUID v4).
    pub row_id: String,
    pub file_path: Option<String>,
    /// Human label (the file name as shown to users).
    pub label: Option<String>,
    pub note: Option<String>,
    pub remote_document_id: Option<i64>,
    pub remote_file_link: Option<String>,
    pub verification_status: Option<String>,
    pub uploaded: bool,
    pub uploaded_at: Option<NaiveDateTime>,
    pub last_upload_error: Option<String>,
}

impl DocumentAttachment {
    /// Creates a pending-local row for a file that still has to be uploaded.
    pub fn pending(row_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        DocumentAttachment {
            row_id: row_id.into(),
            file_path: Some(file_path.into()),
            label: None,
            note: None,
            remote_document_id: None,
            remote_file_link: None,
            verification_status: None,
            uploaded: false,
            uploaded_at: None,
            last_upload_error: None,
        }
    }

    /// A row whose file exists locally but has no backend id yet.
    pub fn is_pending_local(&self) -> bool {
        self.remote_document_id.is_none() && self.file_path.is_some()
    }

    /// A row that mirrors a backend document.
    pub fn is_remote_mirrored(&self) -> bool {
        self.remote_document_id.is_some()
    }

    /// A row still waiting for the upload step.
    pub fn needs_upload(&self) -> bool {
        !self.uploaded || self.remote_document_id.is_none()
    }
}

// =============================================================================
// Secrets
// =============================================================================

/// A plaintext secret on its way to the backend.
///
/// Never serialized and never printed: `Debug` shows `***`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Secrets typed in alongside a save. Both are optional on update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretInput {
    pub portal_password: Option<Secret>,
    pub connection_password: Option<Secret>,
}

impl SecretInput {
    pub fn new(portal: impl Into<String>, connection: impl Into<String>) -> Self {
        SecretInput {
            portal_password: Some(Secret::new(portal)),
            connection_password: Some(Secret::new(connection)),
        }
    }

    /// Drops blank entries so they are treated as "not entered".
    pub fn non_blank(&self) -> SecretInput {
        SecretInput {
            portal_password: self.portal_password.clone().filter(|s| !s.is_blank()),
            connection_password: self.connection_password.clone().filter(|s| !s.is_blank()),
        }
    }

    pub fn is_empty(&self) -> bool {
        let cleaned = self.non_blank();
        cleaned.portal_password.is_none() && cleaned.connection_password.is_none()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
