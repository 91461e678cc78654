//! Error types for traversal and migration runs.
//!
//! Configuration errors are raised before any I/O. Every other failure aborts the
//! run that produced it, so callers never observe a partially aggregated result.

use thiserror::Error;

/// Failures reported by a document store implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Document not found: {path}")]
    NotFound { path: String },
    #[error("Failed precondition for {path}: {reason}")]
    FailedPrecondition { path: String, reason: String },
    #[error("Invalid field path '{0}'")]
    InvalidFieldPath(String),
    #[error("Atomic write batch holds {size} writes but the limit is {max}")]
    BatchTooLarge { size: usize, max: usize },
    /// Transient failure; the same write may succeed when retried.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum MigrateError {
    /// A configuration field failed its validity check.
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidConfiguration {
        field: String,
        value: String,
        context: String,
    },
    /// Misuse of an engine primitive, e.g. draining more tasks than are queued.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// An engine invariant did not hold. Indicates a defect rather than caller misuse.
    #[error("Implementation error: {0}")]
    Implementation(String),
    /// A mutation was rejected at the call boundary.
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Batch {batch_index} failed after {attempts} attempt(s): {source}")]
    BatchFailed {
        batch_index: usize,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

impl MigrateError {
    pub(crate) fn invalid_configuration(
        field: &str,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        MigrateError::InvalidConfiguration {
            field: field.to_string(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    /// True for errors raised before any document was read or written.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            MigrateError::InvalidConfiguration { .. } | MigrateError::ConfigLoad(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_message() {
        let err = MigrateError::invalid_configuration("batch_size", 0, "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid value '0' for field 'batch_size': must be positive"
        );
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_store_error_converts() {
        let err: MigrateError = StoreError::NotFound {
            path: "users/1".to_string(),
        }
        .into();
        assert!(matches!(err, MigrateError::Store(StoreError::NotFound { .. })));
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_batch_failure_keeps_source() {
        let err = MigrateError::BatchFailed {
            batch_index: 3,
            attempts: 2,
            source: anyhow::anyhow!("write rejected"),
        };
        assert_eq!(
            err.to_string(),
            "Batch 3 failed after 2 attempt(s): write rejected"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
