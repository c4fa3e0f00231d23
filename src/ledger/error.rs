//! Ledger error types

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must not be negative: {0}")]
    InvalidAmount(Decimal),

    #[error("Source and target account cannot be the same: {0}")]
    SameAccount(String),

    /// A storage step failed; the transaction was rolled back.
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Corrupt ledger row: {0}")]
    CorruptRow(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::SameAccount(_) => "SAME_ACCOUNT",
            LedgerError::Database { .. } => "DATABASE_ERROR",
            LedgerError::CorruptRow(_) => "CORRUPT_ROW",
        }
    }
}

/// Attach a step description to a sqlx failure.
pub(crate) trait DbContext<T> {
    fn context(self, context: &'static str) -> Result<T, LedgerError>;
}

impl<T> DbContext<T> for Result<T, sqlx::Error> {
    fn context(self, context: &'static str) -> Result<T, LedgerError> {
        self.map_err(|source| LedgerError::Database { context, source })
    }
}
