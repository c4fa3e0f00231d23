//! Quote Forwarder: relays raw trade payloads to the market-data queue.

use std::sync::Arc;
use tracing::error;

use crate::queue::{TradeQueue, quote_trade_result_key};

#[derive(Clone)]
pub struct QuoteForwarder {
    queue: Arc<dyn TradeQueue>,
    enabled: bool,
}

impl QuoteForwarder {
    pub fn new(queue: Arc<dyn TradeQueue>, enabled: bool) -> Self {
        Self { queue, enabled }
    }

    /// Push `raw` unmodified. Failures are logged and otherwise ignored.
    pub async fn forward(&self, symbol: &str, raw: &[u8]) {
        if !self.enabled {
            return;
        }
        let key = quote_trade_result_key(symbol);
        if let Err(e) = self.queue.push(&key, raw.to_vec()).await {
            error!(key = %key, error = %e, "rpush quote trade result failed");
        }
    }
}
