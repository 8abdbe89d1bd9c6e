//! OTC error taxonomy.

use crate::interbank::InterbankError;
use crate::settlement::SettlementError;
use crate::storage::StorageError;

/// Category of an [`OtcError`], used to pick the response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    TurnViolation,
    Conflict,
    BusinessRule,
    Remote,
    Settlement,
    Storage,
}

/// OtcError represents a refused or failed OTC operation. Apart from the
/// storage and remote inconsistency cases, a refused operation changes nothing.
#[derive(Debug, thiserror::Error)]
pub enum OtcError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not your turn: the other party must act first")]
    TurnViolation,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    BusinessRule(String),

    #[error("partner bank error: {0}")]
    Remote(InterbankError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl OtcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OtcError::Validation(_) => ErrorKind::Validation,
            OtcError::NotFound(_) => ErrorKind::NotFound,
            OtcError::Forbidden(_) => ErrorKind::Forbidden,
            OtcError::TurnViolation => ErrorKind::TurnViolation,
            OtcError::Conflict(_) => ErrorKind::Conflict,
            OtcError::BusinessRule(_) => ErrorKind::BusinessRule,
            OtcError::Remote(_) => ErrorKind::Remote,
            OtcError::Settlement(_) => ErrorKind::Settlement,
            OtcError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<InterbankError> for OtcError {
    fn from(e: InterbankError) -> Self {
        match e {
            InterbankError::TurnViolation(_) => OtcError::TurnViolation,
            other => OtcError::Remote(other),
        }
    }
}

impl From<sqlx::Error> for OtcError {
    fn from(e: sqlx::Error) -> Self {
        OtcError::Storage(StorageError::Database(e))
    }
}

pub type Result<T> = std::result::Result<T, OtcError>;
