//! # Sync Error Types
//!
//! Error types for provisioning and reconciliation.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transport     │  │     Remote      │  │      Local              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Transport      │  │  RemoteRejection│  │  Validation             │ │
//! │  │  Timeout        │  │  Provisioning   │  │  NotFound               │ │
//! │  │                 │  │  PartialFailure │  │  Database               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Configuration  │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Config         │  │  Serialization  │                              │
//! │  │  InvalidUrl     │  │  Io / Internal  │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use ledger_core::{CoreError, ValidationError};
use ledger_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering every engine failure.
///
/// ## Propagation
/// - `Validation` and `Provisioning` reach the caller of a user mutation
/// - `PartialFailure` is recorded on a job or run, never aborting a batch
/// - `Transport` / `Timeout` are the only errors the job worker retries
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Network failure before a response was received.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request did not complete within its timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The backend answered with a status the call does not accept.
    #[error("{method} {path} rejected with status {status}: {message}")]
    RemoteRejection {
        status: u16,
        method: String,
        path: String,
        message: String,
    },

    /// A saga step failed; `compensated` tells whether the remote
    /// subscriber was removed again.
    #[error("Provisioning failed at step '{step}': {message}")]
    Provisioning {
        step: String,
        message: String,
        compensated: bool,
    },

    /// Some items of a batch failed; the rest went through.
    #[error("{operation}: {failed} of {total} items failed")]
    PartialFailure {
        operation: String,
        failed: usize,
        total: usize,
    },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// A local precondition failed; nothing was sent.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A record the operation needs does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Ledger access failed.
    #[error("Database error: {0}")]
    Database(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid or unreadable configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Base URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A payload could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// File access failed (attachments, config file).
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        SyncError::Validation(ValidationError::precondition(message))
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            other => SyncError::Database(other.to_string()),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::Validation(v),
            other => SyncError::Serialization(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(0)
        } else if err.is_decode() {
            SyncError::Serialization(err.to_string())
        } else if err.is_builder() {
            SyncError::Config(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true for the taxonomy's transport class.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout(_))
    }

    /// Returns true if re-running the whole operation later may succeed.
    ///
    /// ## Retryable Errors
    /// - Network failures and timeouts
    /// - Backend 5xx, 408 and 429 answers
    ///
    /// ## Non-Retryable Errors
    /// - Validation and configuration errors
    /// - Other backend rejections (the request itself is wrong)
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Timeout(_) => true,
            SyncError::RemoteRejection { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Returns true if the error means "no such record".
    pub fn is_not_found(&self) -> bool {
        match self {
            SyncError::NotFound { .. } => true,
            SyncError::RemoteRejection { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::InvalidUrl(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(status: u16) -> SyncError {
        SyncError::RemoteRejection {
            status,
            method: "PUT".into(),
            path: "/subscribers/42".into(),
            message: "nope".into(),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Transport("connection reset".into()).is_retryable());
        assert!(SyncError::Timeout(60).is_retryable());
        assert!(rejection(503).is_retryable());
        assert!(rejection(429).is_retryable());

        assert!(!rejection(422).is_retryable());
        assert!(!SyncError::Config("bad".into()).is_retryable());
        assert!(!SyncError::precondition("no external id").is_retryable());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(rejection(404).is_not_found());
        assert!(SyncError::from(DbError::not_found("Subscriber", "alice")).is_not_found());
        assert!(!rejection(500).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = rejection(422);
        assert!(err.to_string().contains("PUT /subscribers/42"));
        assert!(err.to_string().contains("422"));

        let err = SyncError::PartialFailure {
            operation: "bulk detail sync".into(),
            failed: 2,
            total: 30,
        };
        assert_eq!(err.to_string(), "bulk detail sync: 2 of 30 items failed");
    }
}
