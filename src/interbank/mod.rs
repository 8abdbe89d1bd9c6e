//! Negotiation protocol with the partner bank.
//!
//! Outbound calls go through [`InterbankClient`]; the inbound side of the
//! same protocol is served by the OTC service through the HTTP API.

mod client;
pub mod wire;

pub use client::{HttpInterbankClient, InterbankClientConfig};
pub use wire::{
    ContractDescriptor, ForeignBankId, MonetaryValue, NegotiationDto, OfferDto, PublicStock,
    SellerStock, StockDescription,
};

use async_trait::async_trait;

use crate::domain::NegotiationRef;

/// InterbankError represents a failed call to the partner bank.
#[derive(Debug, thiserror::Error)]
pub enum InterbankError {
    /// The partner bank refused the change because it was not the caller's turn.
    #[error("not the caller's turn: {0}")]
    TurnViolation(String),

    #[error("partner bank returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InterbankError>;

/// InterbankClient issues negotiation calls to the partner bank.
#[async_trait]
pub trait InterbankClient: Send + Sync {
    /// Returns the routing number of the bank this client talks to.
    fn partner_routing_number(&self) -> u32;

    /// Opens a negotiation and returns the id assigned by the partner.
    async fn create_negotiation(&self, offer: &OfferDto) -> Result<ForeignBankId>;

    async fn counter_negotiation(&self, negotiation: &NegotiationRef, offer: &OfferDto) -> Result<()>;

    /// Accepts the current terms; the partner issues the contract.
    async fn accept_negotiation(&self, negotiation: &NegotiationRef) -> Result<ContractDescriptor>;

    async fn close_negotiation(&self, negotiation: &NegotiationRef) -> Result<()>;

    async fn get_negotiation(&self, negotiation: &NegotiationRef) -> Result<NegotiationDto>;
}
