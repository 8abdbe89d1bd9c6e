//! Securities and their current quotes.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Security is a tradable instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub id: i64,
    pub ticker: String,
    pub name: String,
    /// Last traded price, used as the execution price of market orders.
    pub last_price: Decimal,
    /// Quantity currently offered by open sell orders.
    pub volume: i64,
    /// No trading is permitted after this date.
    pub settlement_date: Option<NaiveDate>,
}

impl Security {
    /// Returns true once the settlement date is strictly before `today`.
    pub fn is_lapsed(&self, today: NaiveDate) -> bool {
        self.settlement_date.is_some_and(|date| date < today)
    }
}

/// Listing holds the current bid/ask quotes for a security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub security_id: i64,
    pub bid: Decimal,
    pub ask: Decimal,
    pub price: Decimal,
}
