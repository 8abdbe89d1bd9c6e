//! Immutable execution records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction records one executed fill. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    /// Originating order (the initiator of the match).
    pub order_id: Option<i64>,
    /// Originating option contract, for exercised options.
    pub contract_id: Option<i64>,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub security_id: i64,
    pub quantity: i64,
    pub price_per_unit: Decimal,
    pub total_price: Decimal,
    pub fee: Decimal,
    pub tax_paid: bool,
    pub created_at: i64,
}

/// Fields of a transaction about to be appended.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub order_id: Option<i64>,
    pub contract_id: Option<i64>,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub security_id: i64,
    pub quantity: i64,
    pub price_per_unit: Decimal,
    pub fee: Decimal,
}

impl NewTransaction {
    pub fn total_price(&self) -> Decimal {
        self.price_per_unit * Decimal::from(self.quantity)
    }
}
