//! One matching round: selecting counter-orders and executing fills.
//!
//! Every fill runs in its own sub-transaction (a savepoint inside the
//! round's transaction). A non all-or-none order takes the first candidate
//! that fills; an all-or-none order needs every leg to fill, and a failed
//! leg throws the whole round away.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MatchError, MatchSettings};
use crate::domain::fees::order_fee;
use crate::domain::{Actuary, NewTransaction, Order};
use crate::pricing::{MarketSnapshot, is_eligible};
use crate::settlement::{OrderTransferRequest, SettlementEmitter};
use crate::storage::{actuaries, orders, portfolios, transactions};

/// Collaborators and parameters shared by the rounds of one worker.
pub(super) struct RoundContext<'a> {
    pub settlement: &'a dyn SettlementEmitter,
    pub settings: &'a MatchSettings,
    pub today: NaiveDate,
}

/// Quantity matched in a round and the settlement requests it emitted.
#[derive(Debug, Default)]
pub(super) struct RoundResult {
    pub matched: i64,
    pub settlement_uids: Vec<String>,
}

/// Returns the open counter-orders `order` may trade with, oldest first.
///
/// Candidates need a settlement account and must be eligible themselves,
/// unless `order` is a market buy.
pub(super) async fn candidates(
    conn: &mut SqliteConnection,
    order: &Order,
    market: &MarketSnapshot,
    today: NaiveDate,
) -> Result<Vec<Order>, MatchError> {
    let counters = orders::counter_orders(conn, order).await?;

    Ok(counters
        .into_iter()
        .filter(|counter| counter.account_id.is_some() && counter.remaining() > 0)
        .filter(|counter| order.is_market_buy() || is_eligible(counter, market, today))
        .collect())
}

/// Executes one round for `order` at `price`.
pub(super) async fn execute(
    ctx: &RoundContext<'_>,
    conn: &mut SqliteConnection,
    order: &Order,
    market: &MarketSnapshot,
    price: Decimal,
) -> Result<RoundResult, MatchError> {
    let counters = candidates(conn, order, market, ctx.today).await?;

    if order.all_or_none {
        execute_all_or_none(ctx, conn, order, &counters, price).await
    } else {
        execute_partial(ctx, conn, order, &counters, price).await
    }
}

async fn execute_partial(
    ctx: &RoundContext<'_>,
    conn: &mut SqliteConnection,
    order: &Order,
    counters: &[Order],
    price: Decimal,
) -> Result<RoundResult, MatchError> {
    for counter in counters {
        let quantity = order.remaining().min(counter.remaining());
        if quantity == 0 {
            continue;
        }
        if !fills_counter_whole(counter, quantity) {
            debug!(order_id = order.id, counter_id = counter.id, quantity, "All-or-none counter needs a full fill");
            continue;
        }

        match fill(ctx, conn, order, counter, price, quantity).await {
            Ok(Some(uid)) => {
                return Ok(RoundResult {
                    matched: quantity,
                    settlement_uids: vec![uid],
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    order_id = order.id,
                    counter_id = counter.id,
                    error = %e,
                    "Fill failed, trying next candidate"
                );
            }
        }
    }

    Ok(RoundResult::default())
}

async fn execute_all_or_none(
    ctx: &RoundContext<'_>,
    conn: &mut SqliteConnection,
    order: &Order,
    counters: &[Order],
    price: Decimal,
) -> Result<RoundResult, MatchError> {
    let wanted = order.remaining();
    let Some(legs) = plan_legs(wanted, counters) else {
        debug!(order_id = order.id, wanted, "Not enough volume for all-or-none order");
        return Ok(RoundResult::default());
    };

    let mut needed = wanted;
    let mut uids = Vec::new();

    for (counter, quantity) in legs {
        match fill(ctx, conn, order, counter, price, quantity).await {
            Ok(Some(uid)) => {
                uids.push(uid);
                needed -= quantity;
            }
            Ok(None) => {
                debug!(order_id = order.id, counter_id = counter.id, "All-or-none leg skipped");
                abort_all(ctx.settlement, &uids, "all-or-none round abandoned").await;
                return Ok(RoundResult::default());
            }
            Err(e) => {
                warn!(order_id = order.id, counter_id = counter.id, error = %e, "All-or-none leg failed");
                abort_all(ctx.settlement, &uids, "all-or-none round abandoned").await;
                return Ok(RoundResult::default());
            }
        }
    }

    if needed > 0 {
        abort_all(ctx.settlement, &uids, "all-or-none round abandoned").await;
        return Ok(RoundResult::default());
    }

    Ok(RoundResult {
        matched: wanted,
        settlement_uids: uids,
    })
}

/// Returns true when `counters` can absorb at least one fill of `order`,
/// or all of it when `order` is all-or-none.
pub(super) fn can_fill(order: &Order, counters: &[Order]) -> bool {
    if order.all_or_none {
        return plan_legs(order.remaining(), counters).is_some();
    }
    counters.iter().any(|counter| {
        let quantity = order.remaining().min(counter.remaining());
        quantity > 0 && fills_counter_whole(counter, quantity)
    })
}

/// An all-or-none counter-order may only be taken in full.
fn fills_counter_whole(counter: &Order, quantity: i64) -> bool {
    !counter.all_or_none || quantity == counter.remaining()
}

/// Picks counter-orders, oldest first, that together fill exactly `wanted`.
/// All-or-none counters that would be left partially filled are passed over.
/// Returns None when the book cannot cover the whole quantity.
fn plan_legs(wanted: i64, counters: &[Order]) -> Option<Vec<(&Order, i64)>> {
    let mut needed = wanted;
    let mut legs = Vec::new();

    for counter in counters {
        if needed == 0 {
            break;
        }
        let quantity = needed.min(counter.remaining());
        if quantity == 0 || !fills_counter_whole(counter, quantity) {
            continue;
        }
        legs.push((counter, quantity));
        needed -= quantity;
    }

    (needed == 0).then_some(legs)
}

/// Sends a failure notice for each emitted request. Best effort.
pub(super) async fn abort_all(settlement: &dyn SettlementEmitter, uids: &[String], reason: &str) {
    for uid in uids {
        if let Err(e) = settlement.abort_transfer(uid, reason).await {
            warn!(uid = %uid, error = %e, "Failed to abort settlement request");
        }
    }
}

/// Executes one fill of `quantity` between `order` and `counter`.
///
/// Returns the settlement uid, or None when the pair is skipped (missing
/// account or margin limit). Any error leaves the sub-transaction rolled back.
async fn fill(
    ctx: &RoundContext<'_>,
    conn: &mut SqliteConnection,
    order: &Order,
    counter: &Order,
    price: Decimal,
    quantity: i64,
) -> Result<Option<String>, MatchError> {
    let (buyer, seller) = if order.is_buy() {
        (order, counter)
    } else {
        (counter, order)
    };
    let (Some(buyer_account), Some(seller_account)) = (buyer.account_id, seller.account_id) else {
        debug!(order_id = order.id, counter_id = counter.id, "Missing settlement account");
        return Ok(None);
    };

    let notional = price * Decimal::from(quantity);
    let mut leg = conn.begin().await?;

    let mut usage: Vec<(i64, Decimal)> = Vec::new();
    for participant in [order, counter].into_iter().filter(|o| o.margin) {
        let requirement = ctx.settings.margin_requirement(price, quantity);
        let Some(actuary) = actuaries::find_by_user(&mut leg, participant.user_id).await? else {
            debug!(order_id = participant.id, "Margin order without actuary");
            return Ok(None);
        };
        if actuary.available_limit() < requirement {
            debug!(
                order_id = participant.id,
                available = %actuary.available_limit(),
                required = %requirement,
                "Margin limit too low"
            );
            return Ok(None);
        }
        usage.push((participant.user_id, requirement));
    }

    let buyer_is_agent = is_agent(&mut leg, buyer.user_id).await?;
    let seller_is_agent = is_agent(&mut leg, seller.user_id).await?;
    if buyer_is_agent {
        usage.push((buyer.user_id, notional));
    }

    let fee = order_fee(order.order_type, notional);

    transactions::insert(
        &mut leg,
        &NewTransaction {
            order_id: Some(order.id),
            contract_id: None,
            buyer_id: buyer.user_id,
            seller_id: seller.user_id,
            security_id: order.security_id,
            quantity,
            price_per_unit: price,
            fee,
        },
    )
    .await?;

    orders::apply_fill(&mut leg, order.id, quantity).await?;
    let counter_remaining = orders::apply_fill(&mut leg, counter.id, quantity).await?;

    portfolios::adjust(&mut leg, buyer.user_id, order.security_id, quantity, price).await?;
    portfolios::adjust(&mut leg, seller.user_id, order.security_id, -quantity, price).await?;

    for (user_id, amount) in usage {
        actuaries::add_used_limit(&mut leg, user_id, amount).await?;
    }

    let house = ctx.settings.house_account_id;
    let request = OrderTransferRequest {
        uid: format!("ORDER-match-{}-{}", order.id, Uuid::new_v4()),
        seller_account_id: if seller_is_agent { house } else { seller_account },
        buyer_account_id: if buyer_is_agent { house } else { buyer_account },
        amount: notional,
        fee,
        direction: order.direction,
    };
    ctx.settlement.request_transfer(&request).await?;

    if let Err(e) = leg.commit().await {
        abort_all(ctx.settlement, std::slice::from_ref(&request.uid), "fill not stored").await;
        return Err(e.into());
    }

    info!(
        order_id = order.id,
        counter_id = counter.id,
        quantity,
        price = %price,
        fee = %fee,
        counter_remaining,
        uid = %request.uid,
        "Fill executed"
    );

    Ok(Some(request.uid))
}

async fn is_agent(conn: &mut SqliteConnection, user_id: i64) -> Result<bool, MatchError> {
    Ok(actuaries::find_by_user(conn, user_id)
        .await?
        .as_ref()
        .is_some_and(Actuary::is_agent))
}
