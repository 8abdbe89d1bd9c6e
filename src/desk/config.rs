//! Desk configuration.

use std::time::Duration;

use crate::config::SweepConfig;

const DEFAULT_RESUBMIT: Duration = Duration::from_secs(5);
const DEFAULT_DECLINE: Duration = Duration::from_secs(60);
const DEFAULT_EXPIRY: Duration = Duration::from_secs(3600);
const DEFAULT_RECONCILE: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_EVICTION: Duration = Duration::from_secs(300);

/// Periods of the desk's background sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    pub resubmit_interval: Duration,
    pub decline_interval: Duration,
    pub expiry_interval: Duration,
    pub reconcile_interval: Duration,
    pub lock_eviction_interval: Duration,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            resubmit_interval: DEFAULT_RESUBMIT,
            decline_interval: DEFAULT_DECLINE,
            expiry_interval: DEFAULT_EXPIRY,
            reconcile_interval: DEFAULT_RECONCILE,
            lock_eviction_interval: DEFAULT_LOCK_EVICTION,
        }
    }
}

impl DeskConfig {
    /// Builds the desk periods, falling back to defaults for absent or zero values.
    pub fn from_config(cfg: Option<&SweepConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = cfg else {
            return defaults;
        };

        Self {
            resubmit_interval: or_default(cfg.resubmit_interval, defaults.resubmit_interval),
            decline_interval: or_default(cfg.decline_interval, defaults.decline_interval),
            expiry_interval: or_default(cfg.expiry_interval, defaults.expiry_interval),
            reconcile_interval: or_default(cfg.reconcile_interval, defaults.reconcile_interval),
            lock_eviction_interval: or_default(
                cfg.lock_eviction_interval,
                defaults.lock_eviction_interval,
            ),
        }
    }
}

fn or_default(value: Duration, default: Duration) -> Duration {
    if value.is_zero() { default } else { value }
}
