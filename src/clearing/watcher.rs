//! Symbol Watcher
//!
//! One per traded symbol. Drains `trade.result.<SYMBOL>` one payload per
//! iteration and backs off for a fixed interval when the queue is empty.
//! Dispatch is fire-and-forget: the watcher never observes a settlement's
//! outcome.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::dispatch::{Dispatched, Dispatcher};
use super::quote::QuoteForwarder;
use super::worker::SettlementWorker;
use crate::queue::{TradeQueue, trade_result_key};

/// Result of a single watcher iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Empty,
    Dispatched,
    Malformed,
    /// Bounded dispatch was full and dropped the event.
    Rejected,
}

pub struct SymbolWatcher {
    symbol: String,
    key: String,
    queue: Arc<dyn TradeQueue>,
    worker: Arc<SettlementWorker>,
    dispatcher: Dispatcher,
    quotes: QuoteForwarder,
    poll_interval: Duration,
}

impl SymbolWatcher {
    pub fn new(
        symbol: &str,
        queue: Arc<dyn TradeQueue>,
        worker: Arc<SettlementWorker>,
        dispatcher: Dispatcher,
        quotes: QuoteForwarder,
        poll_interval: Duration,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            key: trade_result_key(symbol),
            queue,
            worker,
            dispatcher,
            quotes,
            poll_interval,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(symbol = %self.symbol, key = %self.key, "Watching trade results for settlement");

        while !*shutdown.borrow() {
            if self.poll_once().await != PollOutcome::Empty {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        info!(symbol = %self.symbol, "Symbol watcher stopped");
    }

    /// One POLL → POP → DISPATCH round.
    pub async fn poll_once(&self) -> PollOutcome {
        match self.queue.len(&self.key).await {
            Ok(0) => return PollOutcome::Empty,
            Ok(_) => {}
            Err(e) => {
                warn!(key = %self.key, error = %e, "Queue length check failed");
                return PollOutcome::Empty;
            }
        }

        let raw = match self.queue.try_pop(&self.key).await {
            Ok(Some(raw)) => raw,
            // another consumer got there first
            Ok(None) => return PollOutcome::Empty,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Queue pop failed");
                return PollOutcome::Empty;
            }
        };
        debug!(symbol = %self.symbol, raw = %String::from_utf8_lossy(&raw), "Trade result popped");

        let outcome = self.dispatch(&raw).await;
        if outcome != PollOutcome::Malformed {
            self.quotes.forward(&self.symbol, &raw).await;
        }
        outcome
    }

    async fn dispatch(&self, raw: &[u8]) -> PollOutcome {
        let Ok(event) = self.worker.prepare(&self.symbol, raw).await else {
            return PollOutcome::Malformed;
        };

        let worker = self.worker.clone();
        let task_event = event.clone();
        let dispatched = self
            .dispatcher
            .dispatch(async move {
                // outcome already logged by the worker
                let _ = worker.run(task_event).await;
            })
            .await;

        match dispatched {
            Dispatched::Spawned => PollOutcome::Dispatched,
            Dispatched::Rejected => {
                warn!(
                    symbol = %self.symbol,
                    ask = %event.ask_order_id,
                    bid = %event.bid_order_id,
                    "Settlement capacity reached, trade dropped"
                );
                self.worker.abandon(&event).await;
                PollOutcome::Rejected
            }
        }
    }
}
