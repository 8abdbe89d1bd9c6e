//! SQLite connection pool and schema.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::domain::Party;
use crate::storage::StorageError;

/// Date format of settlement dates at rest.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// SqliteStorage owns the connection pool every repository function runs on.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

/// SqliteStorageConfig holds SQLite storage configuration.
#[derive(Debug, Clone)]
pub struct SqliteStorageConfig {
    /// Path to the SQLite database file.
    pub path: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            path: "trading.db".to_string(),
            max_connections: 5,
        }
    }
}

impl SqliteStorage {
    /// Opens (creating if missing) the database and applies the schema.
    pub async fn new(config: SqliteStorageConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let storage = Self { pool };

        storage.migrate().await?;

        info!(path = %config.path, "SQLite storage initialized");
        Ok(storage)
    }

    /// Opens a transaction. Repository calls made on it see and stage its writes.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    /// Checks out a pooled connection for reads outside a transaction.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, StorageError> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Runs database migrations to create the schema.
    async fn migrate(&self) -> Result<(), StorageError> {
        const SCHEMA: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS securities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                last_price TEXT NOT NULL,
                volume INTEGER NOT NULL DEFAULT 0,
                settlement_date TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                security_id INTEGER PRIMARY KEY,
                bid TEXT NOT NULL,
                ask TEXT NOT NULL,
                price TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                account_id INTEGER,
                security_id INTEGER NOT NULL,
                direction TEXT NOT NULL,
                order_type TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                remaining_parts INTEGER,
                limit_price TEXT,
                stop_price TEXT,
                all_or_none INTEGER NOT NULL DEFAULT 0,
                margin INTEGER NOT NULL DEFAULT 0,
                after_hours INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                is_done INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL,
                CHECK (remaining_parts IS NULL OR (remaining_parts >= 0 AND remaining_parts <= quantity))
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_orders_book ON orders(security_id, direction, status, is_done, last_modified)",
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                security_id INTEGER NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                public_count INTEGER NOT NULL DEFAULT 0,
                purchase_price TEXT NOT NULL,
                UNIQUE(user_id, security_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER,
                contract_id INTEGER,
                buyer_id INTEGER NOT NULL,
                seller_id INTEGER NOT NULL,
                security_id INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                price_per_unit TEXT NOT NULL,
                total_price TEXT NOT NULL,
                fee TEXT NOT NULL,
                tax_paid INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_transactions_order ON transactions(order_id)",
            r#"
            CREATE TABLE IF NOT EXISTS actuaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE,
                department TEXT NOT NULL,
                limit_amount TEXT NOT NULL,
                used_limit TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS otc_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                portfolio_id INTEGER,
                security_id INTEGER,
                negotiation_routing INTEGER,
                negotiation_id TEXT,
                ticker TEXT NOT NULL,
                buyer_routing INTEGER,
                buyer_id TEXT NOT NULL,
                seller_routing INTEGER,
                seller_id TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price_per_unit TEXT NOT NULL,
                premium TEXT NOT NULL,
                settlement_date TEXT NOT NULL,
                status TEXT NOT NULL,
                modified_by_routing INTEGER,
                modified_by_id TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                pending_sync TEXT,
                UNIQUE(negotiation_routing, negotiation_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS option_contracts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                otc_trade_id INTEGER NOT NULL UNIQUE,
                remote_contract_id TEXT,
                buyer_routing INTEGER,
                buyer_id TEXT NOT NULL,
                seller_routing INTEGER,
                seller_id TEXT NOT NULL,
                portfolio_id INTEGER,
                security_id INTEGER,
                ticker TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                strike_price TEXT NOT NULL,
                premium TEXT NOT NULL,
                settlement_date TEXT NOT NULL,
                status TEXT NOT NULL,
                is_exercised INTEGER NOT NULL DEFAULT 0,
                uid TEXT UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_option_contracts_portfolio ON option_contracts(portfolio_id, status)",
        ];

        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}

/// Reads a TEXT column holding a decimal.
pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, StorageError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw)
        .map_err(|e| StorageError::InvalidData(format!("Invalid {}: {}", column, e)))
}

/// Reads a nullable TEXT column holding a decimal.
pub(crate) fn optional_decimal_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, StorageError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        Decimal::from_str(&raw)
            .map_err(|e| StorageError::InvalidData(format!("Invalid {}: {}", column, e)))
    })
    .transpose()
}

/// Reads a nullable TEXT column holding a `YYYY-MM-DD` date.
pub(crate) fn optional_date_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<NaiveDate>, StorageError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        NaiveDate::parse_from_str(&raw, DATE_FORMAT)
            .map_err(|e| StorageError::InvalidData(format!("Invalid {}: {}", column, e)))
    })
    .transpose()
}

pub(crate) fn date_column(row: &SqliteRow, column: &str) -> Result<NaiveDate, StorageError> {
    optional_date_column(row, column)?
        .ok_or_else(|| StorageError::InvalidData(format!("Missing {}", column)))
}

/// Reads a column parsed through `FromStr`, such as a status enum.
pub(crate) fn parsed_column<T>(row: &SqliteRow, column: &str) -> Result<T, StorageError>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(StorageError::InvalidData)
}

/// Splits a party into its stored columns. Local parties have no routing number.
pub(crate) fn party_columns(party: &Party) -> (Option<i64>, String) {
    match party {
        Party::Local(id) => (None, id.to_string()),
        Party::Remote { routing_number, id } => (Some(i64::from(*routing_number)), id.clone()),
    }
}

/// Reads a party stored as a (routing, id) column pair.
pub(crate) fn party_column(
    row: &SqliteRow,
    routing_column: &str,
    id_column: &str,
) -> Result<Party, StorageError> {
    let routing: Option<i64> = row.try_get(routing_column)?;
    let id: String = row.try_get(id_column)?;

    match routing {
        None => id
            .parse::<i64>()
            .map(Party::Local)
            .map_err(|_| StorageError::InvalidData(format!("Invalid local {}: {}", id_column, id))),
        Some(routing) => {
            let routing_number = u32::try_from(routing).map_err(|_| {
                StorageError::InvalidData(format!("Invalid {}: {}", routing_column, routing))
            })?;
            Ok(Party::Remote { routing_number, id })
        }
    }
}
