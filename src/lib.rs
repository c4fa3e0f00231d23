//! Clearing Core - Trade Settlement Service
//!
//! Consumes matched trades from per-symbol queues and settles each one as a
//! double-entry ledger transfer between the two counterparties.
//!
//! # Modules
//!
//! - [`queue`] - Trade-event queues (`trade.result.<S>`, `quote.trade.result.<S>`)
//! - [`lock`] - Per-order in-flight counters and dependency waits
//! - [`ledger`] - Account balances and the transfer log
//! - [`clearing`] - Symbol watchers, settlement worker, quote forwarding
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup
//! - [`db`] - PostgreSQL pool

pub mod clearing;
pub mod config;
pub mod db;
pub mod ledger;
pub mod lock;
pub mod logging;
pub mod queue;

pub use clearing::{ClearingError, ClearingHandle, ClearingService, ServiceSettings, TradeEvent};
pub use config::AppConfig;
pub use ledger::{LedgerError, LedgerStore, LockMode, MemoryLedger, PgLedger, trade_transfer_id};
pub use lock::{ClearingLocks, LockCoordinator, LockError, MemoryCounterStore, PgCounterStore};
pub use queue::{MemoryQueue, PgTradeQueue, QueueError, TradeQueue};
