use thiserror::Error;

use crate::ledger::LedgerError;
use crate::lock::LockError;

#[derive(Error, Debug)]
pub enum ClearingError {
    #[error("Malformed trade event: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("No owner found for order {0}")]
    UnknownOrder(String),

    #[error("Ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Lock: {0}")]
    Lock(#[from] LockError),
}
