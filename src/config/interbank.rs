//! Interbank negotiation configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Own routing number used when none is configured.
pub const DEFAULT_ROUTING_NUMBER: u32 = 111;

/// Partner routing number used when none is configured.
pub const DEFAULT_PARTNER_ROUTING_NUMBER: u32 = 444;

/// Interbank partner settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InterbankConfig {
    #[serde(default)]
    pub enabled: bool,
    /// This bank's routing number.
    pub routing_number: Option<u32>,
    /// Routing number of the partner bank.
    pub partner_routing_number: Option<u32>,
    /// Base URL of the partner bank's negotiation API.
    pub partner_url: Option<String>,
    #[serde(default, with = "duration")]
    pub timeout: Duration,
    /// Key sent to the partner (loaded from INTERBANK_API_KEY).
    #[serde(skip)]
    pub api_key: String,
    /// Secret expected from the partner (loaded from INTERBANK_INBOUND_SECRET).
    #[serde(skip)]
    pub inbound_secret: String,
}

impl InterbankConfig {
    pub fn routing_number(&self) -> u32 {
        self.routing_number.unwrap_or(DEFAULT_ROUTING_NUMBER)
    }

    pub fn partner_routing_number(&self) -> u32 {
        self.partner_routing_number
            .unwrap_or(DEFAULT_PARTNER_ROUTING_NUMBER)
    }
}
