use thiserror::Error;
use triggerx_core::{Error as CoreError, StoreErrorKind};

/// Narrow error kind the gateway classifies its own failures into;
/// only `Transient` is retried by callers (spec.md §4.2).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::Transient(_) => StoreErrorKind::Transient,
            StoreError::NotFound { .. } => StoreErrorKind::NotFound,
            StoreError::Constraint(_) => StoreErrorKind::Constraint,
            StoreError::Fatal(_) => StoreErrorKind::Fatal,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        let kind = e.kind();
        let message = e.to_string();
        match e {
            StoreError::NotFound { entity, id } => CoreError::not_found(entity, id.to_string()),
            _ => CoreError::store(kind, message),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
