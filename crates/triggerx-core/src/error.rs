//! Unified error type for the TriggerX core, using thiserror.
//!
//! Each component crate defines its own narrow error enum and converts it
//! into `Error` at its boundary, so only the top-level loop needs to map
//! errors to metrics and logs.

use thiserror::Error;

/// Classification the Job Store Gateway assigns to its own failures.
/// Only `Transient` is retried by callers (spec.md §4.2, §7).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    #[error("transient")]
    Transient,
    #[error("not found")]
    NotFound,
    #[error("constraint violation")]
    Constraint,
    #[error("fatal")]
    Fatal,
}

/// The unified error type for TriggerX core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("store error ({kind}): {message}")]
    Store {
        kind: StoreErrorKind,
        message: String,
    },

    #[error("entity not found: {entity_type} {id}")]
    NotFound { entity_type: String, id: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("no healthy performer available")]
    NoPerformer,

    #[error("circuit breaker open for {target}")]
    CircuitOpen { target: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the enclosing scheduler cycle should retry this operation
    /// rather than fail the job (spec.md §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Store {
                kind: StoreErrorKind::Transient,
                ..
            } | Error::Network { .. }
                | Error::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_store_errors_are_retryable() {
        let e = Error::store(StoreErrorKind::Transient, "connection reset");
        assert!(e.is_retryable());
    }

    #[test]
    fn fatal_store_errors_are_not_retryable() {
        let e = Error::store(StoreErrorKind::Fatal, "schema mismatch");
        assert!(!e.is_retryable());
    }

    #[test]
    fn not_found_is_not_retryable() {
        let e = Error::not_found("Job", "42");
        assert!(!e.is_retryable());
    }
}
