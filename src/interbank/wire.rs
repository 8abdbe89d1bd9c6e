//! JSON payloads of the bank-to-bank negotiation protocol.
//!
//! Settlement dates travel as RFC 3339 timestamps and are plain calendar
//! dates everywhere else; the conversion lives here and nowhere else.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{NegotiationRef, OfferTerms, OtcTrade, Party};

/// Participant or object identifier scoped by the issuing bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignBankId {
    pub routing_number: u32,
    pub id: String,
}

impl ForeignBankId {
    pub fn from_party(party: &Party, own_routing: u32) -> Self {
        let (routing_number, id) = party.to_parts(own_routing);
        Self { routing_number, id }
    }

    pub fn to_party(&self, own_routing: u32) -> Result<Party, String> {
        Party::from_parts(self.routing_number, &self.id, own_routing)
    }
}

impl From<&NegotiationRef> for ForeignBankId {
    fn from(negotiation: &NegotiationRef) -> Self {
        Self {
            routing_number: negotiation.routing_number,
            id: negotiation.id.clone(),
        }
    }
}

impl From<ForeignBankId> for NegotiationRef {
    fn from(id: ForeignBankId) -> Self {
        Self {
            routing_number: id.routing_number,
            id: id.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDescription {
    pub ticker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryValue {
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

impl MonetaryValue {
    pub fn new(currency: &str, amount: Decimal) -> Self {
        Self {
            currency: currency.to_string(),
            amount,
        }
    }
}

/// Terms of a negotiation as exchanged on create and counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferDto {
    pub stock: StockDescription,
    pub settlement_date: String,
    pub price_per_unit: MonetaryValue,
    pub premium: MonetaryValue,
    pub buyer_id: ForeignBankId,
    pub seller_id: ForeignBankId,
    pub amount: i64,
    pub last_modified_by: ForeignBankId,
}

/// Parties of an offer resolved against the own routing number.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferParties {
    pub buyer: Party,
    pub seller: Party,
    pub last_modified_by: Party,
}

impl OfferDto {
    /// Builds the offer for `terms` on a trade between `buyer` and `seller`.
    pub fn new(
        ticker: &str,
        terms: &OfferTerms,
        buyer: &Party,
        seller: &Party,
        last_modified_by: &Party,
        own_routing: u32,
        currency: &str,
    ) -> Self {
        Self {
            stock: StockDescription {
                ticker: ticker.to_string(),
            },
            settlement_date: settlement_timestamp(terms.settlement_date),
            price_per_unit: MonetaryValue::new(currency, terms.price_per_unit),
            premium: MonetaryValue::new(currency, terms.premium),
            buyer_id: ForeignBankId::from_party(buyer, own_routing),
            seller_id: ForeignBankId::from_party(seller, own_routing),
            amount: terms.quantity,
            last_modified_by: ForeignBankId::from_party(last_modified_by, own_routing),
        }
    }

    /// Validates and converts the negotiable terms.
    pub fn terms(&self) -> Result<OfferTerms, String> {
        if self.amount <= 0 {
            return Err("amount must be positive".to_string());
        }
        if self.price_per_unit.amount <= Decimal::ZERO {
            return Err("pricePerUnit must be positive".to_string());
        }
        if self.premium.amount.is_sign_negative() {
            return Err("premium must not be negative".to_string());
        }

        Ok(OfferTerms {
            quantity: self.amount,
            price_per_unit: self.price_per_unit.amount,
            premium: self.premium.amount,
            settlement_date: parse_settlement_date(&self.settlement_date)?,
        })
    }

    pub fn parties(&self, own_routing: u32) -> Result<OfferParties, String> {
        Ok(OfferParties {
            buyer: self.buyer_id.to_party(own_routing)?,
            seller: self.seller_id.to_party(own_routing)?,
            last_modified_by: self.last_modified_by.to_party(own_routing)?,
        })
    }
}

/// Read-only view of a negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationDto {
    #[serde(flatten)]
    pub offer: OfferDto,
    pub is_ongoing: bool,
}

impl NegotiationDto {
    pub fn from_trade(trade: &OtcTrade, own_routing: u32, currency: &str) -> Self {
        Self {
            offer: OfferDto::new(
                &trade.ticker,
                &trade.terms(),
                &trade.buyer,
                &trade.seller,
                &trade.modified_by,
                own_routing,
                currency,
            ),
            is_ongoing: trade.status == crate::domain::OtcStatus::Pending,
        }
    }
}

/// Contract issued by the accepting bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDescriptor {
    pub id: ForeignBankId,
    pub stock: StockDescription,
    pub price_per_unit: MonetaryValue,
    pub settlement_date: String,
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiation_id: Option<ForeignBankId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerStock {
    pub seller: ForeignBankId,
    pub amount: i64,
}

/// Publicly offered holdings of one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicStock {
    pub stock: StockDescription,
    pub sellers: Vec<SellerStock>,
}

/// Formats a settlement date as a midnight UTC timestamp.
pub fn settlement_timestamp(date: NaiveDate) -> String {
    date.and_time(NaiveTime::MIN)
        .and_utc()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a wire settlement date, keeping the calendar date as stated by the sender.
pub fn parse_settlement_date(raw: &str) -> Result<NaiveDate, String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid settlement date: {}", raw))
}
