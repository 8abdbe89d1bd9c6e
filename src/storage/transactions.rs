//! Append-only execution records.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::sqlite::decimal_column;
use crate::domain::{NewTransaction, Transaction, now_millis};
use crate::storage::StorageError;

const TRANSACTION_COLUMNS: &str = "id, order_id, contract_id, buyer_id, seller_id, security_id, \
     quantity, price_per_unit, total_price, fee, tax_paid, created_at";

/// Appends a transaction and returns its id.
pub async fn insert(conn: &mut SqliteConnection, tx: &NewTransaction) -> Result<i64, StorageError> {
    let result = sqlx::query(
        r#"
        INSERT INTO transactions (
            order_id, contract_id, buyer_id, seller_id, security_id, quantity,
            price_per_unit, total_price, fee, tax_paid, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)
        "#,
    )
    .bind(tx.order_id)
    .bind(tx.contract_id)
    .bind(tx.buyer_id)
    .bind(tx.seller_id)
    .bind(tx.security_id)
    .bind(tx.quantity)
    .bind(tx.price_per_unit.to_string())
    .bind(tx.total_price().to_string())
    .bind(tx.fee.to_string())
    .bind(now_millis())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Returns the transactions initiated by an order.
pub async fn for_order(
    conn: &mut SqliteConnection,
    order_id: i64,
) -> Result<Vec<Transaction>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE order_id = ? ORDER BY id"
    ))
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(parse_transaction_row).collect()
}

pub async fn for_contract(
    conn: &mut SqliteConnection,
    contract_id: i64,
) -> Result<Vec<Transaction>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE contract_id = ? ORDER BY id"
    ))
    .bind(contract_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(parse_transaction_row).collect()
}

fn parse_transaction_row(row: &SqliteRow) -> Result<Transaction, StorageError> {
    Ok(Transaction {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        contract_id: row.try_get("contract_id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        security_id: row.try_get("security_id")?,
        quantity: row.try_get("quantity")?,
        price_per_unit: decimal_column(row, "price_per_unit")?,
        total_price: decimal_column(row, "total_price")?,
        fee: decimal_column(row, "fee")?,
        tax_paid: row.try_get("tax_paid")?,
        created_at: row.try_get("created_at")?,
    })
}
