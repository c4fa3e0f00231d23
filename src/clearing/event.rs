//! Trade event wire format

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One execution reported by the matching engine.
///
/// `last`, when non-empty, names the order whose earlier settlements must
/// finish before this one is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub symbol: String,
    pub ask_order_id: String,
    pub bid_order_id: String,
    #[serde(default)]
    pub last: String,
    #[serde(default)]
    pub price: Decimal,
    pub amount: Decimal,
    #[serde(default)]
    pub trade_timestamp: i64,
    /// Owner of the ask order, when the producer knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_user_id: Option<String>,
}

impl TradeEvent {
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn dependency(&self) -> Option<&str> {
        if self.last.is_empty() {
            None
        } else {
            Some(&self.last)
        }
    }
}
