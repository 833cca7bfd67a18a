//! Error types for the persistence orchestration layer
//!
//! This module defines the error every recursive save / retrieve / delete
//! reports. Environmental failures (store errors, cancellation) are values of
//! this type; broken invariants (negative outstanding counters, list misuse)
//! are panics and never appear here.

use crate::db::StoreError;
use crate::models::ObjectKind;
use thiserror::Error;

/// Errors reported by object operations
///
/// # Examples
///
/// ```rust
/// use storykeep_core::operations::PersistError;
///
/// let err = PersistError::cancelled("story-1");
/// assert!(err.is_cancelled());
/// assert!(!err.is_transient());
/// ```
#[derive(Error, Debug)]
pub enum PersistError {
    /// A storage collaborator failed
    ///
    /// Displays as the underlying store error so a remote failure surfaces
    /// with the backend's own message.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation was cancelled before it finished
    ///
    /// Cancellation is cooperative: the operation still completes, with this
    /// error, so outstanding counters above it settle.
    #[error("Operation on '{id}' was cancelled")]
    Cancelled { id: String },

    /// A store returned a record of a different kind than the object asking
    #[error("Record '{id}' is a {found}, expected a {expected}")]
    KindMismatch {
        id: String,
        expected: ObjectKind,
        found: ObjectKind,
    },

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PersistError {
    /// Create a Cancelled error
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::Cancelled { id: id.into() }
    }

    /// Create a KindMismatch error
    pub fn kind_mismatch(id: impl Into<String>, expected: ObjectKind, found: ObjectKind) -> Self {
        Self::KindMismatch {
            id: id.into(),
            expected,
            found,
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an Internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry of the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            PersistError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PersistError::Cancelled { .. })
    }

    /// Whether the error means the record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistError::Store(StoreError::NotFound { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_display_transparently() {
        let err: PersistError = StoreError::remote("network timeout").into();
        assert_eq!(err.to_string(), "network timeout");
    }

    #[test]
    fn test_transient_passes_through() {
        let err: PersistError = StoreError::transient("connection reset").into();
        assert!(err.is_transient());
        assert!(!PersistError::cancelled("x").is_transient());
    }

    #[test]
    fn test_kind_mismatch_display() {
        let err = PersistError::kind_mismatch("m1", ObjectKind::Moment, ObjectKind::Story);
        assert_eq!(
            format!("{}", err),
            "Record 'm1' is a Story, expected a Moment"
        );
    }

    #[test]
    fn test_not_found_classification() {
        let err: PersistError = StoreError::not_found("x").into();
        assert!(err.is_not_found());
        assert!(!PersistError::internal("boom").is_not_found());
    }
}
