//! Persistence of the order book, holdings and OTC negotiations.
//!
//! Repository functions take `&mut SqliteConnection` so the same call works
//! on a pooled connection, inside a transaction, or inside a nested
//! sub-transaction (savepoint).

pub mod actuaries;
pub mod contracts;
pub mod orders;
pub mod otc_trades;
pub mod portfolios;
pub mod securities;
mod sqlite;
pub mod transactions;

pub use sqlite::{SqliteStorage, SqliteStorageConfig};

/// StorageError represents errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),
}

#[cfg(test)]
mod tests;
