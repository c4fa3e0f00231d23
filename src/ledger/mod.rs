//! Ledger Store
//!
//! Account balances plus the append-only transfer log. Every balance change
//! is a double-entry transfer: one debit leg, one credit leg, one shared
//! transfer id, committed atomically.
//!
//! # Lost updates
//!
//! [`LockMode::Snapshot`] reads both accounts before the transaction starts,
//! so two concurrent transfers touching one account can overwrite each
//! other's result. [`LockMode::RowLock`] reads inside the transaction with
//! row locks and is the default.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod transfer_id;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use models::{Account, ChangeType, SYSTEM_USER_ID, TransferCommand, TransferLogEntry};
pub use postgres::PgLedger;
pub use transfer_id::{trade_transfer_id, trade_transfer_id_on};

use async_trait::async_trait;
use rust_decimal::Decimal;

/// How account snapshots are read relative to the write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Read inside the transaction, holding row locks until commit.
    #[default]
    RowLock,
    /// Read outside the transaction. Exposed to lost updates.
    Snapshot,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Move `cmd.amount` from `cmd.from_user` to `cmd.to_user` and write both
    /// log legs. Either everything commits or nothing does.
    async fn transfer(&self, cmd: TransferCommand) -> Result<(), LedgerError>;

    /// Current balance row, or a zero account if none was written yet.
    async fn account(&self, user_id: &str, symbol: &str) -> Result<Account, LedgerError>;

    /// Newest log entries first.
    async fn recent_logs(&self, limit: usize) -> Result<Vec<TransferLogEntry>, LedgerError>;

    async fn logs_by_transfer(
        &self,
        transfer_id: &str,
    ) -> Result<Vec<TransferLogEntry>, LedgerError>;

    /// Credit `user_id` from the system account. Returns the transfer id.
    async fn deposit(
        &self,
        user_id: &str,
        symbol: &str,
        amount: Decimal,
    ) -> Result<String, LedgerError> {
        let transfer_id = uuid::Uuid::new_v4().to_string();
        let cmd = TransferCommand::new(
            symbol,
            SYSTEM_USER_ID,
            user_id,
            amount,
            transfer_id.clone(),
            ChangeType::Deposit,
        );
        self.transfer(cmd).await?;
        Ok(transfer_id)
    }

    /// Debit `user_id` into the system account. Returns the transfer id.
    async fn withdraw(
        &self,
        user_id: &str,
        symbol: &str,
        amount: Decimal,
    ) -> Result<String, LedgerError> {
        let transfer_id = uuid::Uuid::new_v4().to_string();
        let cmd = TransferCommand::new(
            symbol,
            user_id,
            SYSTEM_USER_ID,
            amount,
            transfer_id.clone(),
            ChangeType::Withdraw,
        );
        self.transfer(cmd).await?;
        Ok(transfer_id)
    }

    /// User-to-user transfer under a fresh random id.
    async fn transfer_between(
        &self,
        from_user: &str,
        to_user: &str,
        symbol: &str,
        amount: Decimal,
    ) -> Result<String, LedgerError> {
        let transfer_id = uuid::Uuid::new_v4().to_string();
        let cmd = TransferCommand::new(
            symbol,
            from_user,
            to_user,
            amount,
            transfer_id.clone(),
            ChangeType::Transfer,
        );
        self.transfer(cmd).await?;
        Ok(transfer_id)
    }
}

pub(crate) fn validate(cmd: &TransferCommand) -> Result<(), LedgerError> {
    if cmd.amount < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(cmd.amount));
    }
    if cmd.from_user == cmd.to_user {
        return Err(LedgerError::SameAccount(cmd.from_user.clone()));
    }
    Ok(())
}
