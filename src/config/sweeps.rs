//! Background sweep intervals.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Periods of the desk's background jobs. Zero means "use the default".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepConfig {
    /// Rescan of open approved orders that still have liquidity.
    #[serde(default, with = "duration")]
    pub resubmit_interval: Duration,
    /// Decline of open orders whose settlement date has passed.
    #[serde(default, with = "duration")]
    pub decline_interval: Duration,
    /// Expiry of option contracts past their settlement date.
    #[serde(default, with = "duration")]
    pub expiry_interval: Duration,
    /// Retry of interbank negotiations flagged out of sync.
    #[serde(default, with = "duration")]
    pub reconcile_interval: Duration,
    /// Removal of idle entries from the lock registry.
    #[serde(default, with = "duration")]
    pub lock_eviction_interval: Duration,
}
