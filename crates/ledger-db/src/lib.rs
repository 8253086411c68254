//! # ledger-db: Local Subscriber Ledger
//!
//! SQLite storage for the subscriber ledger, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Subscriber Ledger Data Flow                         │
//! │                                                                         │
//! │  Lifecycle / reconcilers (ledger-sync)                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     ledger-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │    Repositories    │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ SubscriberRepo     │  │            │  │   │
//! │  │   │ SqlitePool    │◄───│ DocumentRepo       │  │ 001_init   │  │   │
//! │  │   │               │    │ CorrelationRepo    │  │            │  │   │
//! │  │   │               │    │ JobRepo / RunRepo  │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL)                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Write Paths
//!
//! - `SubscriberRepository::insert` / `save` write a whole record and its
//!   roster. The lifecycle layer decides whether remote effects follow.
//! - `SubscriberRepository::set_fields` is the narrow write path used by the
//!   saga and the reconcilers; it never involves the lifecycle layer.
//!
//! Both record the [`OperationOrigin`](ledger_core::OperationOrigin) of the
//! write on the row.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledger_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("ledger.db")).await?;
//! let sub = db.subscribers().get("alice").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::correlation::CorrelationRepository;
pub use repository::document::DocumentRepository;
pub use repository::job::{JobRepository, JobStatus, NewJob, SyncJob};
pub use repository::subscriber::{SubscriberField, SubscriberRepository};
pub use repository::sync_run::{RunProgress, RunStatus, SyncRun, SyncRunRepository};
