//! Banking/settlement service configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Where settlement requests and account lookups are sent.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// Base URL of the banking service.
    pub base_url: String,
    #[serde(default, with = "duration")]
    pub timeout: Duration,
    /// Currency of the settlement accounts used for OTC premiums and exercises.
    pub currency: Option<String>,
}
