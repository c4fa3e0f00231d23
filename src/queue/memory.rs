//! In-process queue store: one lock-free `SegQueue` per key.

use async_trait::async_trait;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{QueueError, TradeQueue};

pub struct MemoryQueue {
    lists: DashMap<String, Arc<SegQueue<Vec<u8>>>>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate the store being unreachable: every call fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn list(&self, key: &str) -> Arc<SegQueue<Vec<u8>>> {
        if let Some(list) = self.lists.get(key) {
            return list.clone();
        }
        self.lists
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(SegQueue::new()))
            .clone()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue store unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradeQueue for MemoryQueue {
    async fn push(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.check_available()?;
        self.list(key).push(payload);
        Ok(())
    }

    async fn try_pop(&self, key: &str) -> Result<Option<Vec<u8>>, QueueError> {
        self.check_available()?;
        Ok(self.list(key).pop())
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        self.check_available()?;
        Ok(self.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }
}
