//! Lock Coordinator
//!
//! Per-order counters in a shared store mark an order as "in settlement".
//! Every trade event increments the counter of both of its orders and
//! decrements them once its ledger transfer is done, so a counter reading
//! exactly `1` means "every earlier settlement touching this order has
//! finished and only the waiter's own mark remains".
//!
//! Bookkeeping is best effort: store failures are logged and swallowed, the
//! counters are a cache-tier hint and not a source of truth.

pub mod postgres;
pub mod store;

pub use postgres::PgCounterStore;
pub use store::{CounterStore, MemoryCounterStore};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

pub const LOCK_KEY_PREFIX: &str = "clearing.lock.";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_DEPENDENCY_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock store unavailable: {0}")]
    Unavailable(String),

    #[error("Dependency on order {order_id} not resolved after {waited:?}")]
    DependencyTimeout { order_id: String, waited: Duration },
}

pub fn lock_key(order_id: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, order_id)
}

#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Increment the order's counter. Never fails the caller.
    async fn mark_in_flight(&self, order_id: &str);

    /// Decrement the order's counter and re-arm its expiry. Never fails the caller.
    async fn release(&self, order_id: &str);

    /// Current counter; zero when absent, expired or unreadable.
    async fn read_counter(&self, order_id: &str) -> i64;

    /// Resolve once `read_counter(order_id) == 1`.
    ///
    /// Without a timeout this waits forever; a dependency that never settles
    /// stalls the caller.
    async fn wait_for_dependency(
        &self,
        order_id: &str,
        timeout: Option<Duration>,
    ) -> Result<(), LockError>;
}

/// [`LockCoordinator`] over a [`CounterStore`].
///
/// Waiters are woken by `release` calls made through this coordinator and
/// fall back to polling for releases made elsewhere.
pub struct ClearingLocks {
    store: Arc<dyn CounterStore>,
    ttl: Duration,
    poll_interval: Duration,
    waiters: DashMap<String, Arc<Notify>>,
}

impl ClearingLocks {
    pub fn new(store: Arc<dyn CounterStore>, ttl: Duration, poll_interval: Duration) -> Self {
        Self {
            store,
            ttl,
            poll_interval,
            waiters: DashMap::new(),
        }
    }

    pub fn with_defaults(store: Arc<dyn CounterStore>) -> Self {
        Self::new(store, DEFAULT_LOCK_TTL, DEFAULT_DEPENDENCY_POLL)
    }

    /// Orders that currently have somebody waiting on them.
    pub fn pending_waits(&self) -> usize {
        self.waiters.len()
    }

    fn waiter(&self, order_id: &str) -> Waiter<'_> {
        let notify = self
            .waiters
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        Waiter {
            waiters: &self.waiters,
            order_id: order_id.to_string(),
            notify: Some(notify),
        }
    }

    async fn wait_until_one(&self, order_id: &str) {
        let waiter = self.waiter(order_id);
        let Some(notify) = waiter.notify.as_deref() else {
            return;
        };

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            // register before reading so a release in between is not missed
            notified.as_mut().enable();

            let counter = self.read_counter(order_id).await;
            if counter == 1 {
                break;
            }
            debug!(order_id, counter, "Waiting for earlier settlement of order");

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// One waiter's share of an order's wake-up handle. The map entry goes away
/// with the last share, also when the wait is cancelled by a timeout.
struct Waiter<'a> {
    waiters: &'a DashMap<String, Arc<Notify>>,
    order_id: String,
    notify: Option<Arc<Notify>>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        drop(self.notify.take());
        self.waiters
            .remove_if(&self.order_id, |_, n| Arc::strong_count(n) == 1);
    }
}

#[async_trait]
impl LockCoordinator for ClearingLocks {
    async fn mark_in_flight(&self, order_id: &str) {
        if let Err(e) = self.store.incr(&lock_key(order_id)).await {
            warn!(order_id, error = %e, "clearing lock failed");
        }
    }

    async fn release(&self, order_id: &str) {
        let key = lock_key(order_id);
        if let Err(e) = self.store.decr(&key).await {
            warn!(order_id, error = %e, "clearing unlock failed");
        }
        if let Err(e) = self.store.expire(&key, self.ttl).await {
            warn!(order_id, error = %e, "clearing unlock set expire failed");
        }
        if let Some(notify) = self.waiters.get(order_id) {
            notify.notify_waiters();
        }
    }

    async fn read_counter(&self, order_id: &str) -> i64 {
        match self.store.get(&lock_key(order_id)).await {
            Ok(v) => v.unwrap_or(0),
            Err(e) => {
                warn!(order_id, error = %e, "clearing lock read failed");
                0
            }
        }
    }

    async fn wait_for_dependency(
        &self,
        order_id: &str,
        timeout: Option<Duration>,
    ) -> Result<(), LockError> {
        match timeout {
            None => {
                self.wait_until_one(order_id).await;
                Ok(())
            }
            Some(limit) => tokio::time::timeout(limit, self.wait_until_one(order_id))
                .await
                .map_err(|_| LockError::DependencyTimeout {
                    order_id: order_id.to_string(),
                    waited: limit,
                }),
        }
    }
}
