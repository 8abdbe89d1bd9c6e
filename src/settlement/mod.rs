//! Outbound settlement requests and account lookups.
//!
//! The banking service moves the money; this side only asks it to and
//! accepts its acknowledgements. A request that the service refuses or that
//! cannot be delivered is returned as an error so the caller can undo its
//! own state.

mod client;

pub use client::{BankingClient, BankingClientConfig};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Direction;

/// SettlementError represents a settlement request that was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("settlement rejected: {0}")]
    Rejected(String),

    #[error("banking service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transfer for one matched fill of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTransferRequest {
    pub uid: String,
    pub seller_account_id: i64,
    pub buyer_account_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub fee: Decimal,
    pub direction: Direction,
}

/// Premium paid by the buyer of an option when an offer is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumTransfer {
    pub uid: String,
    pub buyer_account_id: i64,
    pub seller_account_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Strike payment requested when an option is exercised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtcTransferRequest {
    pub uid: String,
    pub seller_account_id: i64,
    pub buyer_account_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Tax withheld from an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxCollection {
    pub account_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Success/failure acknowledgement keyed by settlement uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementAck {
    pub uid: String,
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub message: String,
}

impl SettlementAck {
    pub fn success(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            failure: false,
            message: String::new(),
        }
    }

    pub fn failure(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            failure: true,
            message: message.into(),
        }
    }
}

/// Bank account of a user, as reported by the banking service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

/// Returns the first account held in `currency`.
pub fn account_in<'a>(accounts: &'a [Account], currency: &str) -> Option<&'a Account> {
    accounts
        .iter()
        .find(|account| account.currency.eq_ignore_ascii_case(currency))
}

/// SettlementEmitter sends transfer instructions to the banking service.
///
/// Each call returns once the request is accepted for processing; final
/// settlement is reported later through a [`SettlementAck`].
#[async_trait]
pub trait SettlementEmitter: Send + Sync {
    /// Requests the transfer for a matched order fill.
    async fn request_transfer(&self, request: &OrderTransferRequest) -> Result<(), SettlementError>;

    async fn send_premium(&self, transfer: &PremiumTransfer) -> Result<(), SettlementError>;

    /// Requests the strike payment of an exercised option.
    async fn request_otc_transfer(&self, request: &OtcTransferRequest) -> Result<(), SettlementError>;

    async fn collect_tax(&self, collection: &TaxCollection) -> Result<(), SettlementError>;

    /// Tells the banking service that the transfer `uid` will not complete.
    async fn abort_transfer(&self, uid: &str, reason: &str) -> Result<(), SettlementError>;
}

/// AccountDirectory looks up the bank accounts of a user.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn accounts_for_user(&self, user_id: i64) -> Result<Vec<Account>, SettlementError>;
}
