//! Request payloads of the local trade API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{OtcError, Result};
use crate::domain::OfferTerms;

/// Offer on another user's holding, local or at the partner bank.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOffer {
    /// Seller: a local user id, or `routing‖id` for a partner-bank client.
    pub owner_id: String,
    /// Seller's portfolio; required for local offers.
    pub portfolio_id: Option<i64>,
    /// Required for interbank offers.
    pub ticker: Option<String>,
    pub quantity: i64,
    #[serde(alias = "price_per_unit")]
    pub price_per_unit: Decimal,
    pub premium: Decimal,
    #[serde(alias = "settlement_date")]
    pub settlement_date: String,
}

impl CreateOffer {
    pub fn terms(&self, today: NaiveDate) -> Result<OfferTerms> {
        parse_terms(
            self.quantity,
            self.price_per_unit,
            self.premium,
            &self.settlement_date,
            today,
        )
    }
}

/// New terms proposed for a pending offer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterOffer {
    pub quantity: i64,
    #[serde(alias = "price_per_unit")]
    pub price_per_unit: Decimal,
    pub premium: Decimal,
    #[serde(alias = "settlement_date")]
    pub settlement_date: String,
}

impl CounterOffer {
    pub fn terms(&self, today: NaiveDate) -> Result<OfferTerms> {
        parse_terms(
            self.quantity,
            self.price_per_unit,
            self.premium,
            &self.settlement_date,
            today,
        )
    }
}

fn parse_terms(
    quantity: i64,
    price_per_unit: Decimal,
    premium: Decimal,
    settlement_date: &str,
    today: NaiveDate,
) -> Result<OfferTerms> {
    if quantity <= 0 {
        return Err(OtcError::Validation("quantity must be positive".into()));
    }
    if price_per_unit <= Decimal::ZERO {
        return Err(OtcError::Validation("pricePerUnit must be positive".into()));
    }
    if premium.is_sign_negative() {
        return Err(OtcError::Validation("premium must not be negative".into()));
    }

    let settlement_date = NaiveDate::parse_from_str(settlement_date.trim(), "%Y-%m-%d")
        .map_err(|_| {
            OtcError::Validation(format!(
                "settlementDate must be YYYY-MM-DD, got {:?}",
                settlement_date
            ))
        })?;
    if settlement_date < today {
        return Err(OtcError::Validation("settlementDate is in the past".into()));
    }

    Ok(OfferTerms {
        quantity,
        price_per_unit,
        premium,
        settlement_date,
    })
}
