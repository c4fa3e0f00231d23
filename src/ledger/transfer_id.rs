//! Deterministic trade transfer ids
//!
//! `T` + `yyMMdd` + the first 17 hex chars of SHA-256(ask ++ bid). The same
//! order pair yields the same id for the whole (UTC) day, so two fills between
//! the same pair on one day share an id.

use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};

const PREFIX: &str = "T";
const DIGEST_CHARS: usize = 17;

/// Total length of a trade transfer id.
pub const TRADE_ID_LEN: usize = PREFIX.len() + 6 + DIGEST_CHARS;

pub fn trade_transfer_id(ask_order_id: &str, bid_order_id: &str) -> String {
    trade_transfer_id_on(Utc::now().date_naive(), ask_order_id, bid_order_id)
}

pub fn trade_transfer_id_on(date: NaiveDate, ask_order_id: &str, bid_order_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ask_order_id.as_bytes());
    hasher.update(bid_order_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}{}{}",
        PREFIX,
        date.format("%y%m%d"),
        &digest[..DIGEST_CHARS]
    )
}
