//! OTC offer persistence.
//!
//! Every transition is a compare-and-set on the previous status and last
//! actor, so a stale caller updates nothing and gets `false` back.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::sqlite::{
    DATE_FORMAT, date_column, decimal_column, parsed_column, party_column, party_columns,
};
use crate::domain::{
    NegotiationRef, OfferTerms, OtcStatus, OtcTrade, Party, SyncOp, now_millis,
};
use crate::storage::StorageError;

const TRADE_COLUMNS: &str = "id, portfolio_id, security_id, negotiation_routing, negotiation_id, \
     ticker, buyer_routing, buyer_id, seller_routing, seller_id, quantity, price_per_unit, premium, \
     settlement_date, status, modified_by_routing, modified_by_id, last_modified, pending_sync";

/// Fields of an offer about to be stored.
#[derive(Debug, Clone)]
pub struct NewOtcTrade {
    pub portfolio_id: Option<i64>,
    pub security_id: Option<i64>,
    pub negotiation: Option<NegotiationRef>,
    pub ticker: String,
    pub buyer: Party,
    pub seller: Party,
    pub terms: OfferTerms,
    pub modified_by: Party,
}

/// Stores a new pending offer and returns its id.
pub async fn insert(conn: &mut SqliteConnection, trade: &NewOtcTrade) -> Result<i64, StorageError> {
    let (buyer_routing, buyer_id) = party_columns(&trade.buyer);
    let (seller_routing, seller_id) = party_columns(&trade.seller);
    let (modifier_routing, modifier_id) = party_columns(&trade.modified_by);

    let result = sqlx::query(
        r#"
        INSERT INTO otc_trades (
            portfolio_id, security_id, negotiation_routing, negotiation_id, ticker,
            buyer_routing, buyer_id, seller_routing, seller_id, quantity, price_per_unit,
            premium, settlement_date, status, modified_by_routing, modified_by_id, last_modified
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'pending', ?14, ?15, ?16)
        "#,
    )
    .bind(trade.portfolio_id)
    .bind(trade.security_id)
    .bind(trade.negotiation.as_ref().map(|n| i64::from(n.routing_number)))
    .bind(trade.negotiation.as_ref().map(|n| n.id.clone()))
    .bind(&trade.ticker)
    .bind(buyer_routing)
    .bind(buyer_id)
    .bind(seller_routing)
    .bind(seller_id)
    .bind(trade.terms.quantity)
    .bind(trade.terms.price_per_unit.to_string())
    .bind(trade.terms.premium.to_string())
    .bind(format_date(trade.terms.settlement_date))
    .bind(modifier_routing)
    .bind(modifier_id)
    .bind(now_millis())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find(conn: &mut SqliteConnection, id: i64) -> Result<Option<OtcTrade>, StorageError> {
    let row = sqlx::query(&format!("SELECT {TRADE_COLUMNS} FROM otc_trades WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_trade_row).transpose()
}

/// Looks up an interbank offer by its negotiation reference.
pub async fn find_by_negotiation(
    conn: &mut SqliteConnection,
    negotiation: &NegotiationRef,
) -> Result<Option<OtcTrade>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {TRADE_COLUMNS} FROM otc_trades WHERE negotiation_routing = ? AND negotiation_id = ?"
    ))
    .bind(i64::from(negotiation.routing_number))
    .bind(&negotiation.id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(parse_trade_row).transpose()
}

/// Returns the pending offers in which `party` is buyer or seller.
pub async fn pending_for_party(
    conn: &mut SqliteConnection,
    party: &Party,
) -> Result<Vec<OtcTrade>, StorageError> {
    let (routing, id) = party_columns(party);
    let rows = sqlx::query(&format!(
        "SELECT {TRADE_COLUMNS} FROM otc_trades \
         WHERE status = 'pending' \
           AND ((buyer_routing IS ?1 AND buyer_id = ?2) OR (seller_routing IS ?1 AND seller_id = ?2)) \
         ORDER BY last_modified DESC, id DESC"
    ))
    .bind(routing)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(parse_trade_row).collect()
}

/// Returns the offers whose last remote change has not been stored locally.
pub async fn out_of_sync(conn: &mut SqliteConnection) -> Result<Vec<OtcTrade>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {TRADE_COLUMNS} FROM otc_trades WHERE pending_sync IS NOT NULL ORDER BY id"
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(parse_trade_row).collect()
}

/// Replaces the terms of a pending offer if `previous` is still the last actor.
pub async fn update_terms(
    conn: &mut SqliteConnection,
    id: i64,
    terms: &OfferTerms,
    actor: &Party,
    previous: &Party,
) -> Result<bool, StorageError> {
    let (actor_routing, actor_id) = party_columns(actor);
    let (previous_routing, previous_id) = party_columns(previous);

    let result = sqlx::query(
        r#"
        UPDATE otc_trades SET
            quantity = ?1, price_per_unit = ?2, premium = ?3, settlement_date = ?4,
            modified_by_routing = ?5, modified_by_id = ?6, last_modified = ?7
        WHERE id = ?8 AND status = 'pending'
          AND modified_by_routing IS ?9 AND modified_by_id = ?10
        "#,
    )
    .bind(terms.quantity)
    .bind(terms.price_per_unit.to_string())
    .bind(terms.premium.to_string())
    .bind(format_date(terms.settlement_date))
    .bind(actor_routing)
    .bind(actor_id)
    .bind(now_millis())
    .bind(id)
    .bind(previous_routing)
    .bind(previous_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Moves an offer from `from` to `to`, recording `actor` as the last actor.
///
/// When `previous` is given the move only happens if it is still the last actor.
pub async fn transition(
    conn: &mut SqliteConnection,
    id: i64,
    from: OtcStatus,
    to: OtcStatus,
    actor: &Party,
    previous: Option<&Party>,
) -> Result<bool, StorageError> {
    let (actor_routing, actor_id) = party_columns(actor);
    let (previous_routing, previous_id) = match previous {
        Some(previous) => party_columns(previous),
        None => (None, String::new()),
    };

    let result = sqlx::query(
        r#"
        UPDATE otc_trades SET
            status = ?1, modified_by_routing = ?2, modified_by_id = ?3, last_modified = ?4
        WHERE id = ?5 AND status = ?6
          AND (?7 = 0 OR (modified_by_routing IS ?8 AND modified_by_id = ?9))
        "#,
    )
    .bind(to.to_string())
    .bind(actor_routing)
    .bind(actor_id)
    .bind(now_millis())
    .bind(id)
    .bind(from.to_string())
    .bind(previous.is_some())
    .bind(previous_routing)
    .bind(previous_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Moves an offer between statuses without touching the last actor.
///
/// Used when an option exercise completes or is rolled back; those are
/// settlement events, not negotiation turns.
pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    from: OtcStatus,
    to: OtcStatus,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE otc_trades SET status = ?, last_modified = ? WHERE id = ? AND status = ?",
    )
    .bind(to.to_string())
    .bind(now_millis())
    .bind(id)
    .bind(from.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Overwrites terms, status and last actor from the partner bank's view.
pub async fn apply_remote_state(
    conn: &mut SqliteConnection,
    id: i64,
    terms: &OfferTerms,
    status: OtcStatus,
    modified_by: &Party,
) -> Result<(), StorageError> {
    let (routing, modifier_id) = party_columns(modified_by);

    sqlx::query(
        r#"
        UPDATE otc_trades SET
            quantity = ?1, price_per_unit = ?2, premium = ?3, settlement_date = ?4,
            status = ?5, modified_by_routing = ?6, modified_by_id = ?7, last_modified = ?8
        WHERE id = ?9
        "#,
    )
    .bind(terms.quantity)
    .bind(terms.price_per_unit.to_string())
    .bind(terms.premium.to_string())
    .bind(format_date(terms.settlement_date))
    .bind(status.to_string())
    .bind(routing)
    .bind(modifier_id)
    .bind(now_millis())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Flags (or clears) a remote change that still has to be stored locally.
pub async fn set_pending_sync(
    conn: &mut SqliteConnection,
    id: i64,
    op: Option<SyncOp>,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE otc_trades SET pending_sync = ? WHERE id = ?")
        .bind(op.map(|op| op.to_string()))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_trade_row(row: &SqliteRow) -> Result<OtcTrade, StorageError> {
    let negotiation_routing: Option<i64> = row.try_get("negotiation_routing")?;
    let negotiation_id: Option<String> = row.try_get("negotiation_id")?;
    let negotiation = match (negotiation_routing, negotiation_id) {
        (Some(routing), Some(id)) => Some(NegotiationRef {
            routing_number: u32::try_from(routing).map_err(|_| {
                StorageError::InvalidData(format!("Invalid negotiation_routing: {}", routing))
            })?,
            id,
        }),
        _ => None,
    };

    let pending_sync: Option<String> = row.try_get("pending_sync")?;
    let pending_sync = pending_sync
        .map(|op| op.parse::<SyncOp>().map_err(StorageError::InvalidData))
        .transpose()?;

    let price_per_unit: Decimal = decimal_column(row, "price_per_unit")?;

    Ok(OtcTrade {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        security_id: row.try_get("security_id")?,
        negotiation,
        ticker: row.try_get("ticker")?,
        buyer: party_column(row, "buyer_routing", "buyer_id")?,
        seller: party_column(row, "seller_routing", "seller_id")?,
        quantity: row.try_get("quantity")?,
        price_per_unit,
        premium: decimal_column(row, "premium")?,
        settlement_date: date_column(row, "settlement_date")?,
        status: parsed_column(row, "status")?,
        modified_by: party_column(row, "modified_by_routing", "modified_by_id")?,
        last_modified: row.try_get("last_modified")?,
        pending_sync,
    })
}
