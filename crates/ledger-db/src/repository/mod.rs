//! # Repository Module
//!
//! Repository implementations for the subscriber ledger.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  db.subscribers().get("alice")                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SubscriberRepository ──► subscribers + subscriber_documents           │
//! │  DocumentRepository   ──► subscriber_documents (single rows)           │
//! │  CorrelationRepository ─► correlations                                 │
//! │  JobRepository        ──► sync_jobs                                    │
//! │  SyncRunRepository    ──► sync_runs                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queries are built at runtime with `sqlx::query` / `query_as` and
//! `FromRow` record types, so the crate builds without a live database.

pub mod correlation;
pub mod document;
pub mod job;
pub mod subscriber;
pub mod sync_run;
