//! Runtime statistics for the desk.

/// Counters of the background sweeps since start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub sweep_cycles: u64,
    pub orders_resubmitted: u64,
    pub orders_declined: u64,
    pub contracts_expired: u64,
    pub negotiations_reconciled: u64,
    pub locks_evicted: u64,
    pub failed_sweeps: u64,
}
