//! Trade-Event Queue
//!
//! Named FIFO lists of raw payloads. The matching engine pushes serialized
//! trade events to `trade.result.<SYMBOL>`; the clearing core pops them and,
//! after dispatch, pushes the same bytes to `quote.trade.result.<SYMBOL>`.
//!
//! There is no acknowledgment: a popped payload is gone from the queue.

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgTradeQueue;

use async_trait::async_trait;
use thiserror::Error;

pub const TRADE_RESULT_PREFIX: &str = "trade.result.";
pub const QUOTE_TRADE_RESULT_PREFIX: &str = "quote.trade.result.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),
}

pub fn trade_result_key(symbol: &str) -> String {
    format!("{}{}", TRADE_RESULT_PREFIX, symbol)
}

pub fn quote_trade_result_key(symbol: &str) -> String {
    format!("{}{}", QUOTE_TRADE_RESULT_PREFIX, symbol)
}

#[async_trait]
pub trait TradeQueue: Send + Sync {
    /// Append to the tail.
    async fn push(&self, key: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Remove and return the head, `None` when empty.
    async fn try_pop(&self, key: &str) -> Result<Option<Vec<u8>>, QueueError>;

    async fn len(&self, key: &str) -> Result<usize, QueueError>;
}
