//! Execution price and trigger evaluation per order type.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::SqliteConnection;

use crate::domain::{Direction, Listing, Order, OrderType, Security};
use crate::storage::{StorageError, securities};

/// Whether an order may execute under current market conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// The quote does not satisfy the order's limit or stop condition.
    NotTriggered,
    /// The security's settlement date has passed; the order must be declined.
    SettlementLapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriceRule {
    LastTraded,
    /// Limit price, falling back to the stop price.
    Limit,
    /// Stop price, falling back to the limit price.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerRule {
    Always,
    LimitBound,
    StopTrigger,
    StopAndLimit,
}

#[derive(Debug, Clone, Copy)]
struct ExecutionRule {
    price: PriceRule,
    trigger: TriggerRule,
}

const fn rule_for(order_type: OrderType) -> ExecutionRule {
    match order_type {
        OrderType::Market => ExecutionRule {
            price: PriceRule::LastTraded,
            trigger: TriggerRule::Always,
        },
        OrderType::Limit => ExecutionRule {
            price: PriceRule::Limit,
            trigger: TriggerRule::LimitBound,
        },
        OrderType::Stop => ExecutionRule {
            price: PriceRule::Stop,
            trigger: TriggerRule::StopTrigger,
        },
        OrderType::StopLimit => ExecutionRule {
            price: PriceRule::Stop,
            trigger: TriggerRule::StopAndLimit,
        },
    }
}

/// The state of one security needed to price and trigger its orders.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub security: Security,
    pub listing: Option<Listing>,
}

impl MarketSnapshot {
    /// Loads the security and its listing. Returns None for an unknown security.
    pub async fn load(
        conn: &mut SqliteConnection,
        security_id: i64,
    ) -> Result<Option<Self>, StorageError> {
        let Some(security) = securities::find(conn, security_id).await? else {
            return Ok(None);
        };
        let listing = securities::listing(conn, security_id).await?;
        Ok(Some(Self { security, listing }))
    }

    /// Returns the quote an order of `direction` trades against: bid for
    /// sells, ask for buys.
    pub fn quote_for(&self, direction: Direction) -> Option<Decimal> {
        self.listing.as_ref().map(|listing| match direction {
            Direction::Sell => listing.bid,
            Direction::Buy => listing.ask,
        })
    }
}

/// Returns the price an order executes at, if it has one.
pub fn evaluable_price(order: &Order, security: &Security) -> Option<Decimal> {
    match rule_for(order.order_type).price {
        PriceRule::LastTraded => Some(security.last_price),
        PriceRule::Limit => order.limit_price.or(order.stop_price),
        PriceRule::Stop => order.stop_price.or(order.limit_price),
    }
}

/// Evaluates whether `order` may execute on `today`.
pub fn eligibility(order: &Order, market: &MarketSnapshot, today: NaiveDate) -> Eligibility {
    if market.security.is_lapsed(today) {
        return Eligibility::SettlementLapsed;
    }

    let trigger = rule_for(order.order_type).trigger;
    if trigger == TriggerRule::Always {
        return Eligibility::Eligible;
    }

    let Some(quote) = market.quote_for(order.direction) else {
        return Eligibility::NotTriggered;
    };

    let triggered = match trigger {
        TriggerRule::Always => true,
        TriggerRule::LimitBound => within_limit(order, quote),
        TriggerRule::StopTrigger => stop_reached(order, quote),
        TriggerRule::StopAndLimit => stop_reached(order, quote) && within_limit(order, quote),
    };

    if triggered {
        Eligibility::Eligible
    } else {
        Eligibility::NotTriggered
    }
}

/// Returns true when `order` is eligible.
pub fn is_eligible(order: &Order, market: &MarketSnapshot, today: NaiveDate) -> bool {
    eligibility(order, market, today) == Eligibility::Eligible
}

fn within_limit(order: &Order, quote: Decimal) -> bool {
    let Some(limit) = order.limit_price else {
        return false;
    };
    match order.direction {
        Direction::Sell => quote >= limit,
        Direction::Buy => quote <= limit,
    }
}

fn stop_reached(order: &Order, quote: Decimal) -> bool {
    let Some(stop) = order.stop_price else {
        return false;
    };
    match order.direction {
        Direction::Sell => quote <= stop,
        Direction::Buy => quote >= stop,
    }
}
