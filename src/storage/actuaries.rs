//! Actuary limit usage.

use rust_decimal::Decimal;
use sqlx::{Row, SqliteConnection};

use super::sqlite::decimal_column;
use crate::domain::Actuary;
use crate::storage::StorageError;

pub async fn find_by_user(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<Option<Actuary>, StorageError> {
    let row = sqlx::query(
        "SELECT id, user_id, department, limit_amount, used_limit FROM actuaries WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(Actuary {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            department: row.try_get("department")?,
            limit_amount: decimal_column(&row, "limit_amount")?,
            used_limit: decimal_column(&row, "used_limit")?,
        })),
        None => Ok(None),
    }
}

/// Adds `amount` to the used limit of the user's actuary.
///
/// Users without an actuary are not limit-tracked; returns false for them.
pub async fn add_used_limit(
    conn: &mut SqliteConnection,
    user_id: i64,
    amount: Decimal,
) -> Result<bool, StorageError> {
    let Some(actuary) = find_by_user(conn, user_id).await? else {
        return Ok(false);
    };

    sqlx::query("UPDATE actuaries SET used_limit = ? WHERE id = ?")
        .bind((actuary.used_limit + amount).to_string())
        .bind(actuary.id)
        .execute(&mut *conn)
        .await?;

    Ok(true)
}
