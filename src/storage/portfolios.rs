//! Holdings updates.

use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::sqlite::decimal_column;
use crate::domain::Portfolio;
use crate::storage::StorageError;

const PORTFOLIO_COLUMNS: &str = "id, user_id, security_id, quantity, public_count, purchase_price";

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Portfolio>, StorageError> {
    let row = sqlx::query(&format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_portfolio_row).transpose()
}

pub async fn find_for_user(
    conn: &mut SqliteConnection,
    user_id: i64,
    security_id: i64,
) -> Result<Option<Portfolio>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE user_id = ? AND security_id = ?"
    ))
    .bind(user_id)
    .bind(security_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_portfolio_row).transpose()
}

/// Applies a signed quantity change to a user's holding.
///
/// A first acquisition creates the row, a holding that drops to zero is
/// deleted, and a change that would go negative fails without writing.
/// Acquisitions move the purchase price to the quantity-weighted average.
pub async fn adjust(
    conn: &mut SqliteConnection,
    user_id: i64,
    security_id: i64,
    delta: i64,
    price: Decimal,
) -> Result<(), StorageError> {
    let existing = find_for_user(conn, user_id, security_id).await?;

    let Some(portfolio) = existing else {
        if delta < 0 {
            return Err(StorageError::NotFound(format!(
                "portfolio of user {} for security {}",
                user_id, security_id
            )));
        }
        if delta > 0 {
            sqlx::query(
                "INSERT INTO portfolios (user_id, security_id, quantity, public_count, purchase_price) \
                 VALUES (?, ?, ?, 0, ?)",
            )
            .bind(user_id)
            .bind(security_id)
            .bind(delta)
            .bind(price.to_string())
            .execute(&mut *conn)
            .await?;
            debug!(user_id, security_id, quantity = delta, "Portfolio created");
        }
        return Ok(());
    };

    let quantity = portfolio.quantity + delta;
    if quantity < 0 {
        return Err(StorageError::Constraint(format!(
            "user {} holds {} units of security {}, cannot remove {}",
            user_id, portfolio.quantity, security_id, -delta
        )));
    }

    if quantity == 0 {
        sqlx::query("DELETE FROM portfolios WHERE id = ?")
            .bind(portfolio.id)
            .execute(&mut *conn)
            .await?;
        debug!(user_id, security_id, "Portfolio emptied");
        return Ok(());
    }

    let purchase_price = if delta > 0 {
        ((portfolio.purchase_price * Decimal::from(portfolio.quantity)
            + price * Decimal::from(delta))
            / Decimal::from(quantity))
        .round_dp(6)
    } else {
        portfolio.purchase_price
    };

    sqlx::query(
        "UPDATE portfolios SET quantity = ?, public_count = MIN(public_count, ?), purchase_price = ? \
         WHERE id = ?",
    )
    .bind(quantity)
    .bind(quantity)
    .bind(purchase_price.to_string())
    .bind(portfolio.id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Lowers the publicly offered quantity of a holding, not below zero.
pub async fn reduce_public(
    conn: &mut SqliteConnection,
    portfolio_id: i64,
    quantity: i64,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE portfolios SET public_count = MAX(public_count - ?, 0) WHERE id = ?")
        .bind(quantity)
        .bind(portfolio_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Finds a user's holding in a ticker.
pub async fn find_by_ticker(
    conn: &mut SqliteConnection,
    user_id: i64,
    ticker: &str,
) -> Result<Option<Portfolio>, StorageError> {
    let row = sqlx::query(
        r#"
        SELECT p.id, p.user_id, p.security_id, p.quantity, p.public_count, p.purchase_price
        FROM portfolios p JOIN securities s ON s.id = p.security_id
        WHERE p.user_id = ? AND s.ticker = ?
        "#,
    )
    .bind(user_id)
    .bind(ticker)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_portfolio_row).transpose()
}

/// A publicly offered holding, as listed to partner banks.
#[derive(Debug, Clone)]
pub struct PublicHolding {
    pub ticker: String,
    pub user_id: i64,
    pub public_count: i64,
}

/// Returns all holdings with a positive public count, grouped by ticker order.
pub async fn public_holdings(
    conn: &mut SqliteConnection,
) -> Result<Vec<PublicHolding>, StorageError> {
    let rows = sqlx::query(
        r#"
        SELECT s.ticker, p.user_id, p.public_count
        FROM portfolios p JOIN securities s ON s.id = p.security_id
        WHERE p.public_count > 0
        ORDER BY s.ticker, p.user_id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<PublicHolding, StorageError> {
            Ok(PublicHolding {
                ticker: row.try_get("ticker")?,
                user_id: row.try_get("user_id")?,
                public_count: row.try_get("public_count")?,
            })
        })
        .collect()
}

fn parse_portfolio_row(row: &SqliteRow) -> Result<Portfolio, StorageError> {
    Ok(Portfolio {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        security_id: row.try_get("security_id")?,
        quantity: row.try_get("quantity")?,
        public_count: row.try_get("public_count")?,
        purchase_price: decimal_column(row, "purchase_price")?,
    })
}
