//! Order book queries.

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::sqlite::{DATE_FORMAT, optional_decimal_column, parsed_column};
use crate::domain::{Order, now_millis};
use crate::storage::StorageError;

const ORDER_COLUMNS: &str = "id, user_id, account_id, security_id, direction, order_type, quantity, \
     remaining_parts, limit_price, stop_price, all_or_none, margin, after_hours, status, is_done, \
     last_modified";

/// Loads an order by id.
pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<Order>, StorageError> {
    let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_order_row).transpose()
}

/// Returns the open orders on the opposite side of `order` placed by other
/// users, oldest first.
pub async fn counter_orders(
    conn: &mut SqliteConnection,
    order: &Order,
) -> Result<Vec<Order>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders \
         WHERE security_id = ? AND LOWER(direction) = ? AND user_id != ? AND id != ? \
           AND LOWER(status) = 'approved' AND is_done = 0 \
         ORDER BY last_modified ASC, id ASC"
    ))
    .bind(order.security_id)
    .bind(order.direction.opposite().to_string())
    .bind(order.user_id)
    .bind(order.id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(parse_order_row).collect()
}

/// Returns every approved order that is not done, oldest first.
pub async fn open_orders(conn: &mut SqliteConnection) -> Result<Vec<Order>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE LOWER(status) = 'approved' AND is_done = 0 \
         ORDER BY last_modified ASC, id ASC"
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(parse_order_row).collect()
}

/// Returns ids of open orders whose security settlement date is before `today`.
pub async fn lapsed_open_orders(
    conn: &mut SqliteConnection,
    today: NaiveDate,
) -> Result<Vec<i64>, StorageError> {
    let rows = sqlx::query(
        r#"
        SELECT o.id FROM orders o
        JOIN securities s ON s.id = o.security_id
        WHERE LOWER(o.status) = 'approved' AND o.is_done = 0
          AND s.settlement_date IS NOT NULL AND s.settlement_date < ?
        ORDER BY o.id
        "#,
    )
    .bind(today.format(DATE_FORMAT).to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| row.try_get::<i64, _>("id").map_err(StorageError::from))
        .collect()
}

/// Initialises the remaining quantity of an untouched order to its full quantity.
pub async fn touch_remaining(conn: &mut SqliteConnection, id: i64) -> Result<(), StorageError> {
    sqlx::query("UPDATE orders SET remaining_parts = quantity WHERE id = ? AND remaining_parts IS NULL")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Decrements the remaining quantity by `quantity`, completing the order when
/// it reaches zero. Returns the new remaining quantity.
pub async fn apply_fill(
    conn: &mut SqliteConnection,
    id: i64,
    quantity: i64,
) -> Result<i64, StorageError> {
    let row = sqlx::query(
        r#"
        UPDATE orders SET
            remaining_parts = COALESCE(remaining_parts, quantity) - ?1,
            is_done = CASE WHEN COALESCE(remaining_parts, quantity) - ?1 = 0 THEN 1 ELSE is_done END,
            status = CASE WHEN COALESCE(remaining_parts, quantity) - ?1 = 0 THEN 'done' ELSE status END
        WHERE id = ?2 AND COALESCE(remaining_parts, quantity) >= ?1
        RETURNING remaining_parts
        "#,
    )
    .bind(quantity)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(row.try_get("remaining_parts")?),
        None => Err(StorageError::Constraint(format!(
            "order {}: cannot fill {} units",
            id, quantity
        ))),
    }
}

/// Marks an order fully filled.
pub async fn mark_done(conn: &mut SqliteConnection, id: i64) -> Result<(), StorageError> {
    sqlx::query("UPDATE orders SET remaining_parts = 0, is_done = 1, status = 'done' WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Declines an open order. Returns false if it was no longer open.
pub async fn decline(conn: &mut SqliteConnection, id: i64) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE orders SET status = 'declined', last_modified = ? \
         WHERE id = ? AND LOWER(status) = 'approved' AND is_done = 0",
    )
    .bind(now_millis())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn parse_order_row(row: &SqliteRow) -> Result<Order, StorageError> {
    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        account_id: row.try_get("account_id")?,
        security_id: row.try_get("security_id")?,
        direction: parsed_column(row, "direction")?,
        order_type: parsed_column(row, "order_type")?,
        quantity: row.try_get("quantity")?,
        remaining_parts: row.try_get("remaining_parts")?,
        limit_price: optional_decimal_column(row, "limit_price")?,
        stop_price: optional_decimal_column(row, "stop_price")?,
        all_or_none: row.try_get("all_or_none")?,
        margin: row.try_get("margin")?,
        after_hours: row.try_get("after_hours")?,
        status: parsed_column(row, "status")?,
        is_done: row.try_get("is_done")?,
        last_modified: row.try_get("last_modified")?,
    })
}
