//! Store Error Types
//!
//! This module defines error types for the storage collaborators (local cache
//! stores and the remote backend), providing clear error handling for missing
//! records, disk failures, serialization problems and network failures.

use std::path::PathBuf;
use thiserror::Error;

/// Storage collaborator errors
///
/// Covers all failure cases surfaced by a `LocalStore` or `RemoteStore`.
/// Orchestration-level failures (cancellation, kind mismatches) live in
/// `operations::PersistError`, which wraps this type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record does not exist in the store that was asked for it
    #[error("Record not found: {id}")]
    NotFound { id: String },

    /// Disk operation failed
    #[error("I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Record could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote backend rejected or failed the request
    ///
    /// `transient` marks failures worth retrying (timeouts, dropped
    /// connections). Everything else is final on the first attempt.
    #[error("{message}")]
    Remote { message: String, transient: bool },

    /// A store-internal lock was poisoned by a panicking writer
    #[error("Store lock poisoned: {context}")]
    LockPoisoned { context: String },
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an I/O error bound to the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a final (non-retryable) remote error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            transient: false,
        }
    }

    /// Create a retryable remote error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            transient: true,
        }
    }

    /// Create a lock poisoned error
    pub fn lock_poisoned(context: impl Into<String>) -> Self {
        Self::LockPoisoned {
            context: context.into(),
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Remote {
                transient: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_displays_bare_message() {
        let err = StoreError::remote("network timeout");
        assert_eq!(err.to_string(), "network timeout");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::transient("connection reset").is_transient());
        assert!(!StoreError::not_found("abc").is_transient());
        assert!(!StoreError::lock_poisoned("memory store").is_transient());
    }

    #[test]
    fn test_not_found_display() {
        let err = StoreError::not_found("moment-1");
        assert_eq!(format!("{}", err), "Record not found: moment-1");
    }
}
