//! Per-entity mutual exclusion for matching and OTC transitions.
//!
//! Each keyspace hands out one async mutex per entity id, created on first
//! use. Entries stay until [`LockRegistry::evict_idle`] finds nobody holding
//! or waiting on them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Shared handle to one entity's lock.
pub type EntityLock = Arc<Mutex<()>>;

#[derive(Default)]
struct Keyspace {
    locks: DashMap<i64, EntityLock>,
}

impl Keyspace {
    fn lock_for(&self, id: i64) -> EntityLock {
        Arc::clone(self.locks.entry(id).or_default().value())
    }

    /// Drops entries whose only reference is the map's own.
    ///
    /// Cloning happens under the shard lock held by `entry`, and `retain`
    /// holds the same shard lock, so an entry cannot gain a holder while
    /// it is being inspected.
    fn evict_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// LockRegistry owns the lock tables used by the engine and the OTC service.
///
/// An order lock admits one matching attempt per order at a time; a security
/// lock covers the whole read-compute-write span of one matching round.
#[derive(Default)]
pub struct LockRegistry {
    securities: Keyspace,
    orders: Keyspace,
    trades: Keyspace,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn security(&self, security_id: i64) -> EntityLock {
        self.securities.lock_for(security_id)
    }

    pub fn order(&self, order_id: i64) -> EntityLock {
        self.orders.lock_for(order_id)
    }

    /// Lock serializing negotiation transitions of one OTC trade.
    pub fn trade(&self, trade_id: i64) -> EntityLock {
        self.trades.lock_for(trade_id)
    }

    /// Removes unused entries from every keyspace. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        self.securities.evict_idle() + self.orders.evict_idle() + self.trades.evict_idle()
    }

    /// Returns the number of live entries across keyspaces.
    pub fn len(&self) -> usize {
        self.securities.len() + self.orders.len() + self.trades.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_id_returns_same_lock() {
        let registry = LockRegistry::new();
        let a = registry.order(7);
        let b = registry.order(7);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_keyspaces_are_independent() {
        let registry = LockRegistry::new();
        let security = registry.security(1);
        let order = registry.order(1);
        assert!(!Arc::ptr_eq(&security, &order));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_order_lock_excludes_second_holder() {
        let registry = LockRegistry::new();
        let lock = registry.order(42);
        let _guard = lock.lock().await;

        let contender = registry.order(42);
        assert!(contender.try_lock().is_err());

        let other = registry.order(43);
        assert!(other.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_lock_is_released_after_guard_drop() {
        let registry = Arc::new(LockRegistry::new());
        let lock = registry.security(5);
        let guard = lock.lock().await;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let lock = registry.security(5);
                let _guard = lock.lock().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_evict_idle_keeps_held_entries() {
        let registry = LockRegistry::new();
        let held = registry.trade(1);
        drop(registry.trade(2));
        drop(registry.order(3));

        assert_eq!(registry.evict_idle(), 2);
        assert_eq!(registry.len(), 1);

        let again = registry.trade(1);
        assert!(Arc::ptr_eq(&held, &again));
    }
}
