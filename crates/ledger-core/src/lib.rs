//! # ledger-core: Pure Domain Logic for the Subscriber Ledger
//!
//! This crate is the **heart** of the subscriber ledger. It holds the domain
//! model and every rule that can be expressed without touching a database or
//! the network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Subscriber Ledger Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 ledger-worker (CLI / job worker)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │      ledger-sync (gateway, saga, reconcilers, documents)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ledger-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  mapper   │  │validation │  │  changes  │  │   │
//! │  │   │Subscriber │  │ local ↔   │  │ create    │  │SaveAnalysis│ │   │
//! │  │   │ Document  │  │   wire    │  │ defaults  │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  ledger-db (SQLite ledger)                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Subscriber, DocumentAttachment, OperationOrigin, ...)
//! - [`codes`] - Fixed code ↔ label tables for the backend's enumerated fields
//! - [`mapper`] - Field Mapper: local record ↔ remote wire representation
//! - [`validation`] - Create-time defaults and required-field rules
//! - [`changes`] - Pre-save analysis threaded into the post-save remote step
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use ledger_core::codes::{CodedValue, ProfileStatus};
//!
//! assert_eq!(ProfileStatus::from_code(2), Some(ProfileStatus::Active));
//! assert_eq!(ProfileStatus::Active.label(), "Active (*)");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod changes;
pub mod codes;
pub mod error;
pub mod mapper;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use changes::{SaveAnalysis, SubscriberInput};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Owner-type discriminator the backend expects on subscriber documents.
pub const DOCUMENT_OWNER_TYPE_SUBSCRIBER: &str = "2";

/// Verification status sent with a freshly uploaded document ("pending").
pub const DOCUMENT_INITIAL_VERIFICATION: &str = "0";

/// Priority used when binding a username to its RADIUS policy group.
pub const POLICY_GROUP_PRIORITY: i64 = 1;

/// Length of the random suffix in the throwaway secret sent on create.
pub const TEMPORARY_SECRET_SUFFIX_LEN: usize = 12;
