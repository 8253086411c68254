//! # Error Types
//!
//! Domain-specific error types for ledger-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ledger-core errors (this file)                                        │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Local precondition failures                    │
//! │                                                                         │
//! │  ledger-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  ledger-sync errors (separate crate)                                   │
//! │  └── SyncError        - Transport, remote rejection, partial failure   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → CLI / job record      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A remote payload did not have the shape the mapper needs.
    ///
    /// ## When This Occurs
    /// - Create response without an `id` (neither bare nor under `data`)
    /// - List row that is not a JSON object
    #[error("Malformed remote payload: {0}")]
    MalformedPayload(String),

    /// A stored JSON column could not be decoded.
    #[error("Corrupt stored value for {field}: {reason}")]
    CorruptStoredValue { field: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Local precondition failures.
///
/// These are raised before any remote call is attempted, so a failure here
/// never leaves anything behind on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Invalid format (e.g. unparseable date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Linked record exists locally but is not yet known to the backend.
    #[error("{field} '{local_id}' has no external id yet; sync it first")]
    UnsyncedLink { field: String, local_id: String },

    /// Operation requires state the record is not in.
    ///
    /// ## When This Occurs
    /// - Update or remote action on a record without an external id
    /// - Provisioning a record that has already been provisioned
    #[error("{0}")]
    Precondition(String),
}

impl ValidationError {
    /// Creates a Required error for a given field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates a Precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        ValidationError::Precondition(message.into())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::required("username");
        assert_eq!(err.to_string(), "username is required");

        let err = ValidationError::UnsyncedLink {
            field: "plan".to_string(),
            local_id: "FIBER-100".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "plan 'FIBER-100' has no external id yet; sync it first"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::precondition("no external id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
