use thiserror::Error;
use ulid::Ulid;

use crate::dates::InvalidRange;
use crate::directory::DirectoryError;
use crate::pricing::PricingError;

/// Every failure the booking core reports. Callers receive these verbatim.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("unit {0} is not open for booking")]
    UnitUnavailable(Ulid),
    #[error("dates conflict with reservation {0}")]
    DateRangeConflict(Ulid),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("unit does not offer extra {0:?}")]
    UnknownExtra(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<InvalidRange> for EngineError {
    fn from(e: InvalidRange) -> Self {
        EngineError::InvalidDateRange(e.to_string())
    }
}

impl From<PricingError> for EngineError {
    fn from(e: PricingError) -> Self {
        match e {
            PricingError::UnknownExtra(name) => EngineError::UnknownExtra(name),
            PricingError::Overflow => EngineError::LimitExceeded("price out of range"),
        }
    }
}

impl From<DirectoryError> for EngineError {
    fn from(e: DirectoryError) -> Self {
        EngineError::StorageError(format!("directory: {e}"))
    }
}
