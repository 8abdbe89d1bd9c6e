//! Option contracts created from accepted offers.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Party;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Active,
    Expired,
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractStatus::Active => write!(f, "active"),
            ContractStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ContractStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ContractStatus::Active),
            "expired" => Ok(ContractStatus::Expired),
            _ => Err(format!("Unknown contract status: {}", s)),
        }
    }
}

/// OptionContract gives the buyer the right to purchase `quantity` units at
/// the strike price until the settlement date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub id: i64,
    pub otc_trade_id: i64,
    /// Contract id shared with the partner bank for interbank contracts.
    pub remote_contract_id: Option<String>,
    pub buyer: Party,
    pub seller: Party,
    /// Seller's backing portfolio, present on the local leg only.
    pub portfolio_id: Option<i64>,
    pub security_id: Option<i64>,
    pub ticker: String,
    pub quantity: i64,
    pub strike_price: Decimal,
    pub premium: Decimal,
    pub settlement_date: NaiveDate,
    pub status: ContractStatus,
    pub is_exercised: bool,
    /// Settlement uid assigned when exercise is requested.
    pub uid: Option<String>,
    pub created_at: i64,
}

impl OptionContract {
    /// Returns true once the settlement date is strictly before `today`.
    pub fn is_past_settlement(&self, today: NaiveDate) -> bool {
        self.settlement_date < today
    }

    /// Returns true while an exercise request awaits its settlement acknowledgement.
    pub fn exercise_in_flight(&self) -> bool {
        self.uid.is_some() && !self.is_exercised
    }

    /// Returns the amount the buyer pays on exercise.
    pub fn exercise_amount(&self) -> Decimal {
        self.strike_price * Decimal::from(self.quantity)
    }
}
