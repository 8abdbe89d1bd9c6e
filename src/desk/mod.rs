//! Background desk: the periodic jobs that keep orders, contracts and
//! interbank negotiations moving without a request to drive them.

mod config;
mod error;
mod stats;

pub use config::DeskConfig;
pub use error::DeskError;
pub use stats::Stats;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::today;
use crate::locks::LockRegistry;
use crate::matching::MatchingEngine;
use crate::otc::OtcService;

/// Desk runs the periodic sweeps until stopped.
pub struct Desk {
    engine: Arc<MatchingEngine>,
    otc: Arc<OtcService>,
    locks: Arc<LockRegistry>,
    cfg: DeskConfig,

    // Runtime state
    started_at: Mutex<Option<Instant>>,
    running: Mutex<bool>,
    stats: Mutex<Stats>,
    shutdown: Notify,
}

impl Desk {
    pub fn new(
        engine: Arc<MatchingEngine>,
        otc: Arc<OtcService>,
        locks: Arc<LockRegistry>,
        cfg: DeskConfig,
    ) -> Self {
        Desk {
            engine,
            otc,
            locks,
            cfg,
            started_at: Mutex::new(None),
            running: Mutex::new(false),
            stats: Mutex::new(Stats::default()),
            shutdown: Notify::new(),
        }
    }

    /// Runs the sweep loop until [`Desk::stop`] is called.
    pub async fn start(&self) -> Result<(), DeskError> {
        {
            let mut running = self.running.lock().await;
            if *running {
                return Err(DeskError::AlreadyRunning);
            }
            *running = true;
        }

        {
            let mut started_at = self.started_at.lock().await;
            *started_at = Some(Instant::now());
        }

        info!(
            resubmit = ?self.cfg.resubmit_interval,
            decline = ?self.cfg.decline_interval,
            expiry = ?self.cfg.expiry_interval,
            reconcile = ?self.cfg.reconcile_interval,
            lock_eviction = ?self.cfg.lock_eviction_interval,
            "Starting desk"
        );

        self.run_loop().await;
        Ok(())
    }

    /// Stops the sweep loop. The sweep in progress, if any, finishes first.
    pub async fn stop(&self) {
        {
            let mut running = self.running.lock().await;
            if !*running {
                return;
            }
            *running = false;
        }

        self.shutdown.notify_one();
        let stats = self.stats().await;
        info!(uptime = ?self.uptime().await, cycles = stats.sweep_cycles, "Desk stopped");
    }

    /// Returns a copy of the current statistics.
    pub async fn stats(&self) -> Stats {
        self.stats.lock().await.clone()
    }

    /// Returns true if the desk is currently running.
    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Returns how long the desk has been running.
    pub async fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .await
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    async fn run_loop(&self) {
        let mut resubmit = ticker(self.cfg.resubmit_interval);
        let mut decline = ticker(self.cfg.decline_interval);
        let mut expiry = ticker(self.cfg.expiry_interval);
        let mut reconcile = ticker(self.cfg.reconcile_interval);
        let mut eviction = ticker(self.cfg.lock_eviction_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = resubmit.tick() => {
                    self.resubmit_orders().await;
                }
                _ = decline.tick() => {
                    self.decline_lapsed_orders().await;
                }
                _ = expiry.tick() => {
                    self.expire_contracts().await;
                }
                _ = reconcile.tick() => {
                    self.reconcile_negotiations().await;
                }
                _ = eviction.tick() => {
                    self.evict_locks().await;
                }
            }

            if !self.is_running().await {
                break;
            }
        }
    }

    /// Starts a matching worker for every open order that has a counter-party
    /// and no worker yet.
    pub async fn resubmit_orders(&self) -> u64 {
        let orders = match self.engine.resubmittable_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                self.record_failure("resubmit", e.to_string()).await;
                return 0;
            }
        };

        let mut submitted = 0;
        for order in orders {
            if self.engine.submit_if_idle(order.id).await.is_some() {
                debug!(order_id = order.id, "Order resubmitted");
                submitted += 1;
            }
        }

        let mut stats = self.stats.lock().await;
        stats.sweep_cycles += 1;
        stats.orders_resubmitted += submitted;
        if stats.sweep_cycles % 100 == 1 {
            info!(
                cycle = stats.sweep_cycles,
                resubmitted = stats.orders_resubmitted,
                "Desk sweep running"
            );
        }
        submitted
    }

    pub async fn decline_lapsed_orders(&self) -> u64 {
        match self.engine.decline_lapsed().await {
            Ok(declined) => {
                let declined = declined as u64;
                if declined > 0 {
                    info!(declined, "Lapsed orders declined");
                }
                self.stats.lock().await.orders_declined += declined;
                declined
            }
            Err(e) => {
                self.record_failure("decline", e.to_string()).await;
                0
            }
        }
    }

    pub async fn expire_contracts(&self) -> u64 {
        match self.otc.expire_contracts(today()).await {
            Ok(expired) => {
                if expired > 0 {
                    info!(expired, "Option contracts expired");
                }
                self.stats.lock().await.contracts_expired += expired;
                expired
            }
            Err(e) => {
                self.record_failure("expiry", e.to_string()).await;
                0
            }
        }
    }

    /// Retries the partner calls of negotiations flagged out of sync.
    pub async fn reconcile_negotiations(&self) -> u64 {
        match self.otc.reconcile_pending().await {
            Ok(reconciled) => {
                let reconciled = reconciled as u64;
                if reconciled > 0 {
                    info!(reconciled, "Negotiations reconciled");
                }
                self.stats.lock().await.negotiations_reconciled += reconciled;
                reconciled
            }
            Err(e) => {
                self.record_failure("reconcile", e.to_string()).await;
                0
            }
        }
    }

    pub async fn evict_locks(&self) -> u64 {
        let evicted = self.locks.evict_idle() as u64;
        if evicted > 0 {
            debug!(evicted, remaining = self.locks.len(), "Idle locks evicted");
        }
        self.stats.lock().await.locks_evicted += evicted;
        evicted
    }

    async fn record_failure(&self, sweep: &str, error: String) {
        warn!(sweep, error = %error, "Sweep failed");
        self.stats.lock().await.failed_sweeps += 1;
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
