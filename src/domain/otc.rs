//! Privately negotiated offers.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Party;

/// OtcStatus is the negotiation state of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtcStatus {
    Pending,
    Accepted,
    Rejected,
    /// The option contract created from the offer has been exercised.
    Completed,
}

impl std::fmt::Display for OtcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OtcStatus::Pending => write!(f, "pending"),
            OtcStatus::Accepted => write!(f, "accepted"),
            OtcStatus::Rejected => write!(f, "rejected"),
            OtcStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for OtcStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OtcStatus::Pending),
            "accepted" => Ok(OtcStatus::Accepted),
            "rejected" => Ok(OtcStatus::Rejected),
            "completed" => Ok(OtcStatus::Completed),
            _ => Err(format!("Unknown OTC status: {}", s)),
        }
    }
}

/// A remote change that was applied by the partner bank but not stored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Counter,
    Accept,
    Close,
}

impl std::fmt::Display for SyncOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOp::Counter => write!(f, "counter"),
            SyncOp::Accept => write!(f, "accept"),
            SyncOp::Close => write!(f, "close"),
        }
    }
}

impl std::str::FromStr for SyncOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(SyncOp::Counter),
            "accept" => Ok(SyncOp::Accept),
            "close" => Ok(SyncOp::Close),
            _ => Err(format!("Unknown sync operation: {}", s)),
        }
    }
}

/// Scope of an interbank negotiation: the bank that issued the id, and the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NegotiationRef {
    pub routing_number: u32,
    pub id: String,
}

/// Negotiable terms of an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub quantity: i64,
    pub price_per_unit: Decimal,
    pub premium: Decimal,
    pub settlement_date: NaiveDate,
}

/// OtcTrade is an offer negotiated between two parties.
///
/// A local trade is backed by the seller's portfolio; an interbank trade
/// carries the negotiation reference shared with the partner bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtcTrade {
    pub id: i64,
    pub portfolio_id: Option<i64>,
    pub security_id: Option<i64>,
    pub negotiation: Option<NegotiationRef>,
    pub ticker: String,
    pub buyer: Party,
    pub seller: Party,
    pub quantity: i64,
    pub price_per_unit: Decimal,
    pub premium: Decimal,
    pub settlement_date: NaiveDate,
    pub status: OtcStatus,
    /// The party that performed the last transition.
    pub modified_by: Party,
    pub last_modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_sync: Option<SyncOp>,
}

impl OtcTrade {
    pub fn is_interbank(&self) -> bool {
        self.negotiation.is_some()
    }

    pub fn is_participant(&self, party: &Party) -> bool {
        self.buyer == *party || self.seller == *party
    }

    /// Returns false when `actor` performed the previous transition.
    pub fn is_turn_of(&self, actor: &Party) -> bool {
        self.modified_by != *actor
    }

    /// Returns the participant belonging to another bank, if any.
    pub fn remote_party(&self) -> Option<&Party> {
        [&self.buyer, &self.seller]
            .into_iter()
            .find(|party| !party.is_local())
    }

    pub fn terms(&self) -> OfferTerms {
        OfferTerms {
            quantity: self.quantity,
            price_per_unit: self.price_per_unit,
            premium: self.premium,
            settlement_date: self.settlement_date,
        }
    }
}
