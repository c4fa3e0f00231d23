//! Shared counter store
//!
//! The primitive behind order locks: integer counters with an optional
//! expiry, as offered by a cache tier. `MemoryCounterStore` keeps them in
//! process and expires keys lazily on access.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::LockError;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one and return the new value. Absent keys start at zero.
    async fn incr(&self, key: &str) -> Result<i64, LockError>;

    /// Subtract one and return the new value. Absent keys start at zero.
    async fn decr(&self, key: &str) -> Result<i64, LockError>;

    /// Arm an expiry. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;

    async fn get(&self, key: &str) -> Result<Option<i64>, LockError>;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate the store being unreachable: every call fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Live (non-expired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.counters.iter().filter(|c| !c.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::Unavailable("counter store unreachable".to_string()));
        }
        Ok(())
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, LockError> {
        self.check_available()?;
        let now = Instant::now();
        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        if counter.is_expired(now) {
            *counter = Counter {
                value: 0,
                expires_at: None,
            };
        }
        counter.value += delta;
        Ok(counter.value)
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, LockError> {
        self.add(key, 1)
    }

    async fn decr(&self, key: &str) -> Result<i64, LockError> {
        self.add(key, -1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        self.check_available()?;
        let now = Instant::now();
        match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut e) if !e.get().is_expired(now) => {
                e.get_mut().expires_at = Some(now + ttl);
                Ok(true)
            }
            Entry::Occupied(e) => {
                e.remove();
                Ok(false)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, LockError> {
        self.check_available()?;
        let now = Instant::now();
        let expired = match self.counters.get(key) {
            Some(c) if !c.is_expired(now) => return Ok(Some(c.value)),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.counters.remove_if(key, |_, c| c.is_expired(now));
        }
        Ok(None)
    }
}
