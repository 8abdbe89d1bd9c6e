//! Order matching engine.
//!
//! Each submitted order gets its own worker task. A worker holds the order
//! lock for its whole life and takes the security lock for each round, from
//! opening the round's transaction until after it commits.

mod error;
mod round;

pub use error::MatchError;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MatchingConfig;
use crate::domain::{Order, today};
use crate::locks::LockRegistry;
use crate::pricing::{Eligibility, MarketSnapshot, eligibility, evaluable_price};
use crate::settlement::SettlementEmitter;
use crate::storage::{SqliteStorage, orders, securities};

use round::{RoundContext, RoundResult};

const DEFAULT_BACKOFF_MIN: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);
const DEFAULT_AFTER_HOURS_DELAY: Duration = Duration::from_secs(30 * 60);
const DEFAULT_HOUSE_ACCOUNT: i64 = 112;

/// Pacing and margin parameters of the engine.
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub after_hours_delay: Duration,
    pub margin_rate: Decimal,
    pub margin_buffer: Decimal,
    /// Settlement account that replaces an agent's own account.
    pub house_account_id: i64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
            after_hours_delay: DEFAULT_AFTER_HOURS_DELAY,
            margin_rate: Decimal::new(3, 1),
            margin_buffer: Decimal::new(11, 1),
            house_account_id: DEFAULT_HOUSE_ACCOUNT,
        }
    }
}

impl MatchSettings {
    /// Builds settings from the optional config section; unset values keep the defaults.
    pub fn from_config(cfg: Option<&MatchingConfig>) -> Self {
        let defaults = Self::default();
        let Some(cfg) = cfg else {
            return defaults;
        };

        let pick = |value: Duration, default: Duration| if value.is_zero() { default } else { value };

        Self {
            backoff_min: pick(cfg.backoff_min, defaults.backoff_min),
            backoff_max: pick(cfg.backoff_max, defaults.backoff_max),
            after_hours_delay: pick(cfg.after_hours_delay, defaults.after_hours_delay),
            margin_rate: cfg.margin_rate.unwrap_or(defaults.margin_rate),
            margin_buffer: cfg.margin_buffer.unwrap_or(defaults.margin_buffer),
            house_account_id: cfg.house_account_id.unwrap_or(defaults.house_account_id),
        }
    }

    /// Returns the limit a margin fill reserves: price × quantity × rate × buffer.
    pub fn margin_requirement(&self, price: Decimal, quantity: i64) -> Decimal {
        price * Decimal::from(quantity) * self.margin_rate * self.margin_buffer
    }

    /// Picks the pause before the next round of an order.
    fn backoff(&self, after_hours: bool) -> Duration {
        let min = self.backoff_min.as_millis() as u64;
        let max = (self.backoff_max.as_millis() as u64).max(min);
        let delay = Duration::from_millis(rand::rng().random_range(min..=max));
        if after_hours {
            delay + self.after_hours_delay
        } else {
            delay
        }
    }
}

/// Final state of a matching attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// The order is fully filled.
    Done,
    /// The order stays open with unfilled quantity.
    Pending,
    /// The order's limit or stop condition is not met.
    NotTriggered,
    /// The security's settlement date passed; the order was declined.
    Declined,
    /// The order was not open when the worker picked it up.
    Skipped,
}

/// Result of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub order_id: i64,
    pub filled: i64,
    pub rounds: u32,
    pub state: MatchState,
}

impl MatchOutcome {
    fn new(order_id: i64, state: MatchState) -> Self {
        Self {
            order_id,
            filled: 0,
            rounds: 0,
            state,
        }
    }
}

/// MatchingEngine runs one supervised worker per submitted order.
pub struct MatchingEngine {
    storage: SqliteStorage,
    settlement: Arc<dyn SettlementEmitter>,
    locks: Arc<LockRegistry>,
    settings: MatchSettings,

    // Workers queued or running, per order
    in_flight: RwLock<HashMap<i64, usize>>,
}

impl MatchingEngine {
    pub fn new(
        storage: SqliteStorage,
        settlement: Arc<dyn SettlementEmitter>,
        locks: Arc<LockRegistry>,
        settings: MatchSettings,
    ) -> Self {
        Self {
            storage,
            settlement,
            locks,
            settings,
            in_flight: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a worker for `order_id`. Safe to call repeatedly: workers of the
    /// same order run one after another and re-read the order first.
    pub fn submit(self: &Arc<Self>, order_id: i64) -> JoinHandle<Result<MatchOutcome, MatchError>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            *engine.in_flight.write().await.entry(order_id).or_insert(0) += 1;
            engine.supervise(order_id).await
        })
    }

    /// Starts a worker unless one is already queued or running for the order.
    pub async fn submit_if_idle(
        self: &Arc<Self>,
        order_id: i64,
    ) -> Option<JoinHandle<Result<MatchOutcome, MatchError>>> {
        {
            let mut in_flight = self.in_flight.write().await;
            if in_flight.contains_key(&order_id) {
                return None;
            }
            in_flight.insert(order_id, 1);
        }

        let engine = Arc::clone(self);
        Some(tokio::spawn(async move { engine.supervise(order_id).await }))
    }

    #[cfg(test)]
    async fn is_in_flight(&self, order_id: i64) -> bool {
        self.in_flight.read().await.contains_key(&order_id)
    }

    async fn supervise(&self, order_id: i64) -> Result<MatchOutcome, MatchError> {
        let result = self.run(order_id).await;
        {
            let mut in_flight = self.in_flight.write().await;
            if let Some(workers) = in_flight.get_mut(&order_id) {
                *workers -= 1;
                if *workers == 0 {
                    in_flight.remove(&order_id);
                }
            }
        }

        match &result {
            Ok(outcome) => debug!(
                order_id,
                filled = outcome.filled,
                rounds = outcome.rounds,
                state = ?outcome.state,
                "Matching worker finished"
            ),
            Err(e) => error!(order_id, error = %e, "Matching worker failed"),
        }

        result
    }

    async fn run(&self, order_id: i64) -> Result<MatchOutcome, MatchError> {
        let order_lock = self.locks.order(order_id);
        let _order_guard = order_lock.lock().await;

        let order = {
            let mut conn = self.storage.acquire().await?;
            let Some(order) = orders::find(&mut conn, order_id).await? else {
                return Err(MatchError::OrderNotFound(order_id));
            };
            if !order.is_open() {
                debug!(order_id, status = %order.status, "Order is not open");
                return Ok(MatchOutcome::new(order_id, MatchState::Skipped));
            }
            if order.remaining_parts.is_none() {
                orders::touch_remaining(&mut conn, order_id).await?;
            }

            let market = MarketSnapshot::load(&mut conn, order.security_id)
                .await?
                .ok_or(MatchError::SecurityNotFound(order.security_id))?;
            let today = today();

            match eligibility(&order, &market, today) {
                Eligibility::SettlementLapsed => {
                    if orders::decline(&mut conn, order_id).await? {
                        info!(order_id, security_id = order.security_id, "Order declined, settlement date passed");
                    }
                    return Ok(MatchOutcome::new(order_id, MatchState::Declined));
                }
                Eligibility::NotTriggered => {
                    debug!(order_id, "Order not triggered");
                    return Ok(MatchOutcome::new(order_id, MatchState::NotTriggered));
                }
                Eligibility::Eligible => {}
            }

            if order.all_or_none {
                let available: i64 = round::candidates(&mut conn, &order, &market, today)
                    .await?
                    .iter()
                    .map(Order::remaining)
                    .sum();
                if available < order.remaining() {
                    debug!(order_id, wanted = order.remaining(), available, "All-or-none order cannot be filled yet");
                    return Ok(MatchOutcome::new(order_id, MatchState::Pending));
                }
            }

            order
        };

        let mut outcome = MatchOutcome::new(order_id, MatchState::Pending);
        let security_id = order.security_id;

        loop {
            let Some(round) = self.run_round(order_id, security_id).await? else {
                break;
            };
            if round.declined {
                outcome.state = MatchState::Declined;
                return Ok(outcome);
            }
            if round.matched == 0 {
                break;
            }

            outcome.filled += round.matched;
            outcome.rounds += 1;

            let current = {
                let mut conn = self.storage.acquire().await?;
                orders::find(&mut conn, order_id)
                    .await?
                    .ok_or(MatchError::OrderNotFound(order_id))?
            };

            info!(
                order_id,
                matched = round.matched,
                remaining = current.remaining(),
                round = outcome.rounds,
                "Matching round committed"
            );

            if current.remaining() == 0 {
                if !current.is_done {
                    let mut conn = self.storage.acquire().await?;
                    orders::mark_done(&mut conn, order_id).await?;
                }
                outcome.state = MatchState::Done;
                info!(order_id, filled = outcome.filled, "Order filled");
                return Ok(outcome);
            }
            if !current.is_open() {
                break;
            }

            let delay = self.settings.backoff(current.after_hours);
            debug!(order_id, delay = ?delay, "Waiting before next round");
            tokio::time::sleep(delay).await;
        }

        Ok(outcome)
    }

    /// Runs one round under the security lock. Returns None when the order
    /// is no longer matchable.
    async fn run_round(
        &self,
        order_id: i64,
        security_id: i64,
    ) -> Result<Option<CommittedRound>, MatchError> {
        let security_lock = self.locks.security(security_id);
        let _security_guard = security_lock.lock().await;

        let mut tx = self.storage.begin().await?;

        let Some(order) = orders::find(&mut tx, order_id).await? else {
            return Err(MatchError::OrderNotFound(order_id));
        };
        if !order.is_open() || order.remaining() == 0 {
            return Ok(None);
        }

        let market = MarketSnapshot::load(&mut tx, security_id)
            .await?
            .ok_or(MatchError::SecurityNotFound(security_id))?;
        let today = today();

        if market.security.is_lapsed(today) {
            orders::decline(&mut tx, order_id).await?;
            securities::refresh_available_volume(&mut tx, security_id).await?;
            tx.commit().await?;
            info!(order_id, security_id, "Order declined, settlement date passed");
            return Ok(Some(CommittedRound {
                matched: 0,
                declined: true,
            }));
        }

        let Some(price) = evaluable_price(&order, &market.security) else {
            warn!(order_id, order_type = %order.order_type, "Order has no evaluable price");
            return Ok(None);
        };

        let ctx = RoundContext {
            settlement: self.settlement.as_ref(),
            settings: &self.settings,
            today,
        };
        let RoundResult {
            matched,
            settlement_uids,
        } = round::execute(&ctx, &mut tx, &order, &market, price).await?;

        if matched == 0 {
            tx.rollback().await?;
            debug!(order_id, "No counter-order matched");
            return Ok(None);
        }

        if let Err(e) = securities::refresh_available_volume(&mut tx, security_id).await {
            round::abort_all(self.settlement.as_ref(), &settlement_uids, "round not stored").await;
            return Err(e.into());
        }
        if let Err(e) = tx.commit().await {
            round::abort_all(self.settlement.as_ref(), &settlement_uids, "round not stored").await;
            return Err(e.into());
        }

        Ok(Some(CommittedRound {
            matched,
            declined: false,
        }))
    }

    /// Returns true when the order could match right now.
    pub async fn has_liquidity(&self, order: &Order) -> Result<bool, MatchError> {
        let mut conn = self.storage.acquire().await?;
        let Some(market) = MarketSnapshot::load(&mut conn, order.security_id).await? else {
            return Ok(false);
        };
        let today = today();
        if eligibility(order, &market, today) != Eligibility::Eligible {
            return Ok(false);
        }

        let counters = round::candidates(&mut conn, order, &market, today).await?;
        Ok(round::can_fill(order, &counters))
    }

    /// Returns the open orders that currently have a counter-party.
    pub async fn resubmittable_orders(&self) -> Result<Vec<Order>, MatchError> {
        let open = {
            let mut conn = self.storage.acquire().await?;
            orders::open_orders(&mut conn).await?
        };

        let mut ready = Vec::new();
        for order in open {
            if self.has_liquidity(&order).await? {
                ready.push(order);
            }
        }
        Ok(ready)
    }

    /// Declines open orders whose security settlement date is before today.
    ///
    /// Orders with a worker holding their lock are left to that worker,
    /// which declines them on its next round.
    pub async fn decline_lapsed(&self) -> Result<usize, MatchError> {
        let lapsed = {
            let mut conn = self.storage.acquire().await?;
            orders::lapsed_open_orders(&mut conn, today()).await?
        };

        let mut declined = 0;
        for order_id in lapsed {
            let order_lock = self.locks.order(order_id);
            let Ok(_guard) = order_lock.try_lock() else {
                debug!(order_id, "Order busy, decline deferred to its worker");
                continue;
            };

            let mut tx = self.storage.begin().await?;
            let Some(order) = orders::find(&mut tx, order_id).await? else {
                continue;
            };
            if orders::decline(&mut tx, order_id).await? {
                securities::refresh_available_volume(&mut tx, order.security_id).await?;
                tx.commit().await?;
                declined += 1;
                info!(order_id, security_id = order.security_id, "Lapsed order declined");
            }
        }

        Ok(declined)
    }
}

/// A round whose effects are committed.
struct CommittedRound {
    matched: i64,
    declined: bool,
}
