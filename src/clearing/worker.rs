//! Settlement Worker
//!
//! Turns one trade event into one ledger transfer:
//!
//! ```text
//! prepare (watcher task)        run (spawned task)
//! ─────────────────────         ──────────────────────────────────────────
//! decode ─▶ mark ask, bid  ──▶  [wait last == 1] ─▶ transfer ─▶ release ask, bid
//!   │
//!   └─ malformed: log, drop
//! ```
//!
//! Marks are taken before the spawn so they follow queue order; otherwise a
//! later fill could mark its order first and read the counter as settled.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::directory::OrderDirectory;
use super::error::ClearingError;
use super::event::TradeEvent;
use crate::ledger::{ChangeType, LedgerStore, TransferCommand, trade_transfer_id};
use crate::lock::LockCoordinator;

pub struct SettlementWorker {
    ledger: Arc<dyn LedgerStore>,
    locks: Arc<dyn LockCoordinator>,
    directory: Arc<dyn OrderDirectory>,
    dependency_timeout: Option<Duration>,
}

impl SettlementWorker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        locks: Arc<dyn LockCoordinator>,
        directory: Arc<dyn OrderDirectory>,
        dependency_timeout: Option<Duration>,
    ) -> Self {
        Self {
            ledger,
            locks,
            directory,
            dependency_timeout,
        }
    }

    /// Decode the payload and mark both orders in flight.
    ///
    /// An undecodable payload is logged and returned as
    /// [`ClearingError::Malformed`]; nothing is marked and it is not retried.
    pub async fn prepare(
        &self,
        symbol: &str,
        raw: &[u8],
    ) -> Result<TradeEvent, ClearingError> {
        let mut event = match TradeEvent::from_slice(raw) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    symbol,
                    error = %e,
                    raw = %String::from_utf8_lossy(raw),
                    "Malformed trade event dropped"
                );
                return Err(e.into());
            }
        };
        if event.symbol != symbol {
            warn!(
                queue_symbol = symbol,
                event_symbol = %event.symbol,
                "Trade event symbol differs from its queue, settling on queue symbol"
            );
            event.symbol = symbol.to_string();
        }

        self.locks.mark_in_flight(&event.ask_order_id).await;
        self.locks.mark_in_flight(&event.bid_order_id).await;
        Ok(event)
    }

    /// Wait for the `last` dependency, settle, release. Returns the
    /// transfer id on success. Errors are logged here; callers may ignore them.
    pub async fn run(&self, event: TradeEvent) -> Result<String, ClearingError> {
        if let Some(last) = event.dependency() {
            if let Err(e) = self
                .locks
                .wait_for_dependency(last, self.dependency_timeout)
                .await
            {
                error!(
                    ask = %event.ask_order_id,
                    bid = %event.bid_order_id,
                    last,
                    error = %e,
                    "Dependency wait abandoned, trade not settled"
                );
                self.abandon(&event).await;
                return Err(e.into());
            }
        }

        let result = self.settle(&event).await;
        self.abandon(&event).await;

        match &result {
            Ok(transfer_id) => info!(
                symbol = %event.symbol,
                transfer_id = %transfer_id,
                ask = %event.ask_order_id,
                bid = %event.bid_order_id,
                amount = %event.amount,
                "Trade settled"
            ),
            Err(e) => error!(
                symbol = %event.symbol,
                ask = %event.ask_order_id,
                bid = %event.bid_order_id,
                error = %e,
                "Trade settlement failed"
            ),
        }
        result
    }

    /// Release both order locks without settling.
    pub async fn abandon(&self, event: &TradeEvent) {
        self.locks.release(&event.ask_order_id).await;
        self.locks.release(&event.bid_order_id).await;
    }

    /// The ask side delivers `amount` of the symbol to the bid side.
    async fn settle(&self, event: &TradeEvent) -> Result<String, ClearingError> {
        let seller = self
            .resolve_owner(&event.ask_order_id, event.ask_user_id.as_deref())
            .await?;
        let buyer = self
            .resolve_owner(&event.bid_order_id, event.bid_user_id.as_deref())
            .await?;

        let transfer_id = trade_transfer_id(&event.ask_order_id, &event.bid_order_id);
        let cmd = TransferCommand::new(
            event.symbol.as_str(),
            seller,
            buyer,
            event.amount,
            transfer_id.clone(),
            ChangeType::Trade,
        )
        .with_info(format!(
            "ask:{} bid:{} price:{}",
            event.ask_order_id, event.bid_order_id, event.price
        ));

        self.ledger.transfer(cmd).await?;
        Ok(transfer_id)
    }

    async fn resolve_owner(
        &self,
        order_id: &str,
        embedded: Option<&str>,
    ) -> Result<String, ClearingError> {
        if let Some(user_id) = embedded.filter(|u| !u.is_empty()) {
            return Ok(user_id.to_string());
        }
        self.directory
            .owner(order_id)
            .await?
            .ok_or_else(|| ClearingError::UnknownOrder(order_id.to_string()))
    }
}
