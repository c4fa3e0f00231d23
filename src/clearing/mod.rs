//! Clearing
//!
//! Drains per-symbol trade queues and settles every trade as a ledger
//! transfer.
//!
//! ```text
//! trade.result.<S> ──▶ SymbolWatcher ──▶ SettlementWorker ──▶ LockCoordinator
//!                          │                     │
//!                          ▼                     ▼
//!              quote.trade.result.<S>       LedgerStore
//! ```
//!
//! Independent trades settle concurrently in no particular order. Only trades
//! that name a `last` order are held back until that order's earlier
//! settlements have finished.

pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod quote;
pub mod service;
pub mod watcher;
pub mod worker;

pub use directory::{MemoryOrderDirectory, OrderDirectory, PgOrderDirectory};
pub use dispatch::{DispatchPolicy, Dispatched, Dispatcher, OverflowPolicy};
pub use error::ClearingError;
pub use event::TradeEvent;
pub use quote::QuoteForwarder;
pub use service::{ClearingHandle, ClearingService, ServiceSettings};
pub use watcher::{PollOutcome, SymbolWatcher};
pub use worker::SettlementWorker;
