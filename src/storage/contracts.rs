//! Option contract persistence.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::otc_trades::format_date;
use super::sqlite::{date_column, decimal_column, parsed_column, party_column, party_columns};
use crate::domain::{OptionContract, Party, now_millis};
use crate::storage::StorageError;

const CONTRACT_COLUMNS: &str = "id, otc_trade_id, remote_contract_id, buyer_routing, buyer_id, \
     seller_routing, seller_id, portfolio_id, security_id, ticker, quantity, strike_price, premium, \
     settlement_date, status, is_exercised, uid, created_at";

/// Fields of a contract about to be created from an accepted offer.
#[derive(Debug, Clone)]
pub struct NewContract {
    pub otc_trade_id: i64,
    pub remote_contract_id: Option<String>,
    pub buyer: Party,
    pub seller: Party,
    pub portfolio_id: Option<i64>,
    pub security_id: Option<i64>,
    pub ticker: String,
    pub quantity: i64,
    pub strike_price: Decimal,
    pub premium: Decimal,
    pub settlement_date: NaiveDate,
}

/// Creates an active contract and returns its id. One contract per offer.
pub async fn insert(conn: &mut SqliteConnection, contract: &NewContract) -> Result<i64, StorageError> {
    let (buyer_routing, buyer_id) = party_columns(&contract.buyer);
    let (seller_routing, seller_id) = party_columns(&contract.seller);

    let result = sqlx::query(
        r#"
        INSERT INTO option_contracts (
            otc_trade_id, remote_contract_id, buyer_routing, buyer_id, seller_routing, seller_id,
            portfolio_id, security_id, ticker, quantity, strike_price, premium, settlement_date,
            status, is_exercised, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'active', 0, ?14)
        "#,
    )
    .bind(contract.otc_trade_id)
    .bind(&contract.remote_contract_id)
    .bind(buyer_routing)
    .bind(buyer_id)
    .bind(seller_routing)
    .bind(seller_id)
    .bind(contract.portfolio_id)
    .bind(contract.security_id)
    .bind(&contract.ticker)
    .bind(contract.quantity)
    .bind(contract.strike_price.to_string())
    .bind(contract.premium.to_string())
    .bind(format_date(contract.settlement_date))
    .bind(now_millis())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<OptionContract>, StorageError> {
    let row = sqlx::query(&format!("SELECT {CONTRACT_COLUMNS} FROM option_contracts WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_contract_row).transpose()
}

pub async fn find_by_uid(
    conn: &mut SqliteConnection,
    uid: &str,
) -> Result<Option<OptionContract>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM option_contracts WHERE uid = ?"
    ))
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_contract_row).transpose()
}

pub async fn find_by_trade(
    conn: &mut SqliteConnection,
    otc_trade_id: i64,
) -> Result<Option<OptionContract>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM option_contracts WHERE otc_trade_id = ?"
    ))
    .bind(otc_trade_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_contract_row).transpose()
}

/// Returns the contracts in which `party` is buyer or seller, newest first.
pub async fn for_party(
    conn: &mut SqliteConnection,
    party: &Party,
) -> Result<Vec<OptionContract>, StorageError> {
    let (routing, id) = party_columns(party);
    let rows = sqlx::query(&format!(
        "SELECT {CONTRACT_COLUMNS} FROM option_contracts \
         WHERE (buyer_routing IS ?1 AND buyer_id = ?2) OR (seller_routing IS ?1 AND seller_id = ?2) \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(routing)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(parse_contract_row).collect()
}

/// Returns the quantity already promised through active, unexercised
/// contracts backed by a portfolio.
pub async fn open_exposure(
    conn: &mut SqliteConnection,
    portfolio_id: i64,
) -> Result<i64, StorageError> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(quantity), 0) AS exposure FROM option_contracts \
         WHERE portfolio_id = ? AND status = 'active' AND is_exercised = 0",
    )
    .bind(portfolio_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.try_get("exposure")?)
}

/// Assigns the exercise settlement uid. Returns false if one is already set.
pub async fn assign_uid(
    conn: &mut SqliteConnection,
    id: i64,
    uid: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE option_contracts SET uid = ? WHERE id = ? AND uid IS NULL AND is_exercised = 0",
    )
    .bind(uid)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn clear_uid(conn: &mut SqliteConnection, id: i64) -> Result<(), StorageError> {
    sqlx::query("UPDATE option_contracts SET uid = NULL WHERE id = ? AND is_exercised = 0")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn mark_exercised(conn: &mut SqliteConnection, id: i64) -> Result<bool, StorageError> {
    let result =
        sqlx::query("UPDATE option_contracts SET is_exercised = 1 WHERE id = ? AND is_exercised = 0")
            .bind(id)
            .execute(&mut *conn)
            .await?;

    Ok(result.rows_affected() > 0)
}

/// Expires active contracts whose settlement date is before `today` and
/// that have no exercise in flight. Returns the number expired.
pub async fn expire_lapsed(
    conn: &mut SqliteConnection,
    today: NaiveDate,
) -> Result<u64, StorageError> {
    let result = sqlx::query(
        "UPDATE option_contracts SET status = 'expired' \
         WHERE status = 'active' AND is_exercised = 0 AND uid IS NULL AND settlement_date < ?",
    )
    .bind(format_date(today))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn parse_contract_row(row: &SqliteRow) -> Result<OptionContract, StorageError> {
    Ok(OptionContract {
        id: row.try_get("id")?,
        otc_trade_id: row.try_get("otc_trade_id")?,
        remote_contract_id: row.try_get("remote_contract_id")?,
        buyer: party_column(row, "buyer_routing", "buyer_id")?,
        seller: party_column(row, "seller_routing", "seller_id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        security_id: row.try_get("security_id")?,
        ticker: row.try_get("ticker")?,
        quantity: row.try_get("quantity")?,
        strike_price: decimal_column(row, "strike_price")?,
        premium: decimal_column(row, "premium")?,
        settlement_date: date_column(row, "settlement_date")?,
        status: parsed_column(row, "status")?,
        is_exercised: row.try_get("is_exercised")?,
        uid: row.try_get("uid")?,
        created_at: row.try_get("created_at")?,
    })
}
