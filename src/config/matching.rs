//! Matching engine configuration.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Matching loop pacing and margin parameters.
///
/// Zero durations and missing values fall back to the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchingConfig {
    /// Lower bound of the randomized delay between matching rounds.
    #[serde(default, with = "duration")]
    pub backoff_min: Duration,
    /// Upper bound of the randomized delay between matching rounds.
    #[serde(default, with = "duration")]
    pub backoff_max: Duration,
    /// Extra delay added between rounds for after-hours orders.
    #[serde(default, with = "duration")]
    pub after_hours_delay: Duration,
    /// Share of the notional reserved against an actuary limit for margin fills (e.g. "0.3").
    pub margin_rate: Option<Decimal>,
    /// Safety multiplier applied on top of the margin rate (e.g. "1.1").
    pub margin_buffer: Option<Decimal>,
    /// Settlement account used in place of an agent's own account.
    pub house_account_id: Option<i64>,
}
