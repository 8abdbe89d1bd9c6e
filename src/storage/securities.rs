//! Securities, listings and the derived sell-side volume.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::sqlite::{decimal_column, optional_date_column};
use crate::domain::{Listing, Security};
use crate::storage::StorageError;

const SECURITY_COLUMNS: &str = "id, ticker, name, last_price, volume, settlement_date";

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Security>, StorageError> {
    let row = sqlx::query(&format!("SELECT {SECURITY_COLUMNS} FROM securities WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_security_row).transpose()
}

pub async fn find_by_ticker(
    conn: &mut SqliteConnection,
    ticker: &str,
) -> Result<Option<Security>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {SECURITY_COLUMNS} FROM securities WHERE ticker = ?"
    ))
    .bind(ticker)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_security_row).transpose()
}

/// Loads the current quotes of a security, if it is listed.
pub async fn listing(
    conn: &mut SqliteConnection,
    security_id: i64,
) -> Result<Option<Listing>, StorageError> {
    let row = sqlx::query("SELECT security_id, bid, ask, price FROM listings WHERE security_id = ?")
        .bind(security_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(Listing {
            security_id: row.try_get("security_id")?,
            bid: decimal_column(&row, "bid")?,
            ask: decimal_column(&row, "ask")?,
            price: decimal_column(&row, "price")?,
        })),
        None => Ok(None),
    }
}

/// Recomputes the public volume of a security as the sum of the remaining
/// quantity of its open sell orders. Returns the new volume.
pub async fn refresh_available_volume(
    conn: &mut SqliteConnection,
    security_id: i64,
) -> Result<i64, StorageError> {
    let row = sqlx::query(
        r#"
        UPDATE securities SET volume = (
            SELECT COALESCE(SUM(COALESCE(remaining_parts, quantity)), 0) FROM orders
            WHERE security_id = ?1 AND LOWER(direction) = 'sell' AND LOWER(status) = 'approved' AND is_done = 0
        )
        WHERE id = ?1
        RETURNING volume
        "#,
    )
    .bind(security_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(row.try_get("volume")?),
        None => Err(StorageError::NotFound(format!("security {}", security_id))),
    }
}

fn parse_security_row(row: &SqliteRow) -> Result<Security, StorageError> {
    Ok(Security {
        id: row.try_get("id")?,
        ticker: row.try_get("ticker")?,
        name: row.try_get("name")?,
        last_price: decimal_column(row, "last_price")?,
        volume: row.try_get("volume")?,
        settlement_date: optional_date_column(row, "settlement_date")?,
    })
}
