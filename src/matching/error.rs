//! Matching error types.

use crate::settlement::SettlementError;
use crate::storage::StorageError;

/// MatchError represents a failure of a matching worker or of one fill.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("security {0} not found")]
    SecurityNotFound(i64),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),
}

impl From<sqlx::Error> for MatchError {
    fn from(e: sqlx::Error) -> Self {
        MatchError::Storage(StorageError::Database(e))
    }
}
