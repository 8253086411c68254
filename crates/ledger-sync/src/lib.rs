//! # ledger-sync: Provisioning and Reconciliation Engine
//!
//! Keeps the local subscriber ledger and the remote provisioning backend in
//! agreement, in both directions.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Architecture                               │
//! │                                                                         │
//! │   OUTBOUND (user-initiated, synchronous)                               │
//! │   ────────────────────────────────────                                 │
//! │   SubscriberService ──► Provisioner (saga / update / delete)          │
//! │        │                     │                                          │
//! │        │                     └──► DocumentSynchronizer (uploads)        │
//! │        ▼                                                                │
//! │   ledger-db (insert / save with OperationOrigin)                        │
//! │                                                                         │
//! │   INBOUND (reconciliation, usually background jobs)                     │
//! │   ─────────────────────────────────────────────                         │
//! │   ListReconciler   ── GET /subscribers?limit&offset ──► identity rows  │
//! │   DetailReconciler ── GET /subscribers/{id} ──────────► full mirror    │
//! │        └──► DocumentSynchronizer ── GET /documents/subscriber/{id}     │
//! │                                                                         │
//! │   Every inbound write uses OperationOrigin::ReconciliationSync, so it  │
//! │   can never trigger an outbound call (no sync ↔ mutate loop).          │
//! │                                                                         │
//! │   ┌───────────────────┐   ┌──────────────────┐   ┌──────────────────┐  │
//! │   │ RemoteGateway     │   │ CorrelationRes.  │   │ JobScheduler +   │  │
//! │   │ reqwest, scope    │   │ local ↔ external │   │ JobWorker        │  │
//! │   │ headers, redacted │   │ id translation   │   │ (sync_jobs)      │  │
//! │   │ request logging   │   │                  │   │                  │  │
//! │   └───────────────────┘   └──────────────────┘   └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`error`] - Sync error taxonomy
//! - [`gateway`] - HTTP gateway to the backend
//! - [`remote`] - One method per backend endpoint
//! - [`correlation`] - Local/external id translation
//! - [`saga`] - Provisioning saga, update push, remote delete
//! - [`lifecycle`] - Create / save / delete entry points
//! - [`list_reconciler`] - Paged identity sweep
//! - [`detail_reconciler`] - Full mirror, single and bulk
//! - [`documents`] - Document roster reconciliation and uploads
//! - [`actions`] - Subscriber actions and pipeline triggers
//! - [`jobs`] - Scheduler adapter and background worker
//! - [`engine`] - Wiring
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_sync::{Engine, EngineConfig};
//! use ledger_core::{Actor, OperationContext, SubscriberInput};
//!
//! let config = EngineConfig::load(None)?;
//! let engine = Engine::from_config(config, database)?;
//!
//! let ctx = OperationContext::user(Actor::new("ops@example.net"));
//! engine.subscribers().create(SubscriberInput::new(record), &ctx).await?;
//!
//! engine.list_reconciler().sync_list(50).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod gateway;
pub mod remote;

pub mod correlation;
pub mod documents;
pub mod saga;
pub mod lifecycle;

pub mod detail_reconciler;
pub mod list_reconciler;

pub mod actions;
pub mod engine;
pub mod jobs;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{EngineConfig, JobSettings, RemoteSettings, ScopeSettings, SyncSettings};
pub use error::{SyncError, SyncResult};
pub use gateway::{DeleteOutcome, RemoteGateway};
pub use remote::RemoteApi;

pub use actions::SubscriberActions;
pub use correlation::CorrelationResolver;
pub use detail_reconciler::{BulkDetailReport, DetailReconciler, DetailSyncReport};
pub use documents::{DocumentSynchronizer, RosterReport, UploadReport};
pub use engine::Engine;
pub use jobs::{EnqueuedJob, JobRunner, JobScheduler, JobWorker, JobWorkerHandle, QueueScheduler, SyncJobKind};
pub use lifecycle::{SaveOutcome, SubscriberService};
pub use list_reconciler::{ListReconciler, ListSyncReport};
pub use saga::{ProvisionOutcome, ProvisionSettings, Provisioner, SagaStep};
