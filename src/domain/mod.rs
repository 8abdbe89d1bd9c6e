//! Domain models for order matching and OTC negotiation.

mod actuary;
mod contract;
pub mod fees;
mod market;
mod order;
mod otc;
mod party;
mod portfolio;
mod transaction;

pub use actuary::Actuary;
pub use contract::{ContractStatus, OptionContract};
pub use market::{Listing, Security};
pub use order::{Direction, Order, OrderStatus, OrderType};
pub use otc::{NegotiationRef, OfferTerms, OtcStatus, OtcTrade, SyncOp};
pub use party::Party;
pub use portfolio::Portfolio;
pub use transaction::{NewTransaction, Transaction};

/// Returns the current time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Returns the current UTC calendar date.
pub fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}
