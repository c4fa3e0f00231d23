//! Task spawn policy for settlement workers
//!
//! `Unbounded` spawns one task per event with no backpressure: queue depth
//! and in-flight settlements can grow without limit under a load spike.
//! `Bounded` caps in-flight settlements and decides what happens to the
//! event that arrives when the cap is reached.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for a free slot; the watcher stops draining meanwhile.
    Block,
    /// Reject the event.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    #[default]
    Unbounded,
    Bounded {
        limit: usize,
        overflow: OverflowPolicy,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Spawned,
    /// Cap reached under [`OverflowPolicy::Drop`]; the task was not started.
    Rejected,
}

#[derive(Clone)]
pub struct Dispatcher {
    policy: DispatchPolicy,
    permits: Option<Arc<Semaphore>>,
}

impl Dispatcher {
    pub fn new(policy: DispatchPolicy) -> Self {
        let permits = match policy {
            DispatchPolicy::Unbounded => None,
            DispatchPolicy::Bounded { limit, .. } => Some(Arc::new(Semaphore::new(limit.max(1)))),
        };
        Self { policy, permits }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Free slots, `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|s| s.available_permits())
    }

    pub async fn dispatch<F>(&self, task: F) -> Dispatched
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (permits, overflow) = match (&self.permits, self.policy) {
            (Some(permits), DispatchPolicy::Bounded { overflow, .. }) => (permits.clone(), overflow),
            _ => {
                tokio::spawn(task);
                return Dispatched::Spawned;
            }
        };

        let permit = match overflow {
            OverflowPolicy::Block => match permits.acquire_owned().await {
                Ok(p) => p,
                // the semaphore is never closed
                Err(_) => return Dispatched::Rejected,
            },
            OverflowPolicy::Drop => match permits.try_acquire_owned() {
                Ok(p) => p,
                Err(_) => return Dispatched::Rejected,
            },
        };

        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
        Dispatched::Spawned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_unbounded_always_spawns() {
        let d = Dispatcher::new(DispatchPolicy::Unbounded);
        assert_eq!(d.available(), None);
        for _ in 0..100 {
            assert_eq!(
                d.dispatch(std::future::pending::<()>()).await,
                Dispatched::Spawned
            );
        }
    }

    #[tokio::test]
    async fn test_bounded_drop_rejects_when_full() {
        let d = Dispatcher::new(DispatchPolicy::Bounded {
            limit: 1,
            overflow: OverflowPolicy::Drop,
        });
        let (tx, rx) = oneshot::channel::<()>();
        assert_eq!(
            d.dispatch(async move {
                let _ = rx.await;
            })
            .await,
            Dispatched::Spawned
        );
        assert_eq!(d.dispatch(async {}).await, Dispatched::Rejected);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while d.available() != Some(1) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(d.dispatch(async {}).await, Dispatched::Spawned);
    }

    #[tokio::test]
    async fn test_bounded_block_waits_for_slot() {
        let d = Dispatcher::new(DispatchPolicy::Bounded {
            limit: 1,
            overflow: OverflowPolicy::Block,
        });
        let (tx, rx) = oneshot::channel::<()>();
        d.dispatch(async move {
            let _ = rx.await;
        })
        .await;

        let blocked = {
            let d = d.clone();
            tokio::spawn(async move { d.dispatch(async {}).await })
        };
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        tx.send(()).unwrap();
        assert_eq!(blocked.await.unwrap(), Dispatched::Spawned);
    }
}
