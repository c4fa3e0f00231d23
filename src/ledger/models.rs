//! Ledger data models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved counterparty for deposits and withdrawals.
pub const SYSTEM_USER_ID: &str = "system";

/// One balance row per (user, symbol).
///
/// A user that has never been touched reads as [`Account::zero`]; the row is
/// only written on the first transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub symbol: String,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub frozen_balance: Decimal,
}

impl Account {
    pub fn zero(user_id: &str, symbol: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            total_balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            frozen_balance: Decimal::ZERO,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total_balance == self.available_balance + self.frozen_balance
    }

    /// Apply a signed delta to total and available balance.
    pub(crate) fn apply(&mut self, delta: Decimal) {
        self.total_balance += delta;
        self.available_balance += delta;
    }
}

/// Reason recorded on both legs of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Trade,
    Deposit,
    Withdraw,
    Transfer,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Trade => "trade",
            ChangeType::Deposit => "deposit",
            ChangeType::Withdraw => "withdraw",
            ChangeType::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trade" => Some(ChangeType::Trade),
            "deposit" => Some(ChangeType::Deposit),
            "withdraw" => Some(ChangeType::Withdraw),
            "transfer" => Some(ChangeType::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One leg of a double-entry transfer. `amount` is the signed delta of this
/// leg: `after_balance == before_balance + amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLogEntry {
    pub user_id: String,
    pub symbol: String,
    pub before_balance: Decimal,
    pub amount: Decimal,
    pub after_balance: Decimal,
    pub transfer_id: String,
    pub change_type: ChangeType,
    pub info: String,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to move `amount` of `symbol` from one user to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub symbol: String,
    pub from_user: String,
    pub to_user: String,
    pub amount: Decimal,
    pub transfer_id: String,
    pub change_type: ChangeType,
    pub info: String,
}

impl TransferCommand {
    pub fn new(
        symbol: impl Into<String>,
        from_user: impl Into<String>,
        to_user: impl Into<String>,
        amount: Decimal,
        transfer_id: impl Into<String>,
        change_type: ChangeType,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            from_user: from_user.into(),
            to_user: to_user.into(),
            amount,
            transfer_id: transfer_id.into(),
            change_type,
            info: String::new(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    /// Build both log legs from the pre-transfer snapshots.
    ///
    /// Returns `(debit, credit)`; the snapshots are advanced in place.
    pub(crate) fn apply(
        &self,
        from: &mut Account,
        to: &mut Account,
        now: DateTime<Utc>,
    ) -> (TransferLogEntry, TransferLogEntry) {
        let from_before = from.total_balance;
        let to_before = to.total_balance;
        from.apply(-self.amount);
        to.apply(self.amount);

        let debit = TransferLogEntry {
            user_id: self.from_user.clone(),
            symbol: self.symbol.clone(),
            before_balance: from_before,
            amount: -self.amount,
            after_balance: from.total_balance,
            transfer_id: self.transfer_id.clone(),
            change_type: self.change_type,
            info: self.info.clone(),
            created_at: now,
        };
        let credit = TransferLogEntry {
            user_id: self.to_user.clone(),
            symbol: self.symbol.clone(),
            before_balance: to_before,
            amount: self.amount,
            after_balance: to.total_balance,
            transfer_id: self.transfer_id.clone(),
            change_type: self.change_type,
            info: self.info.clone(),
            created_at: now,
        };
        (debit, credit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_roundtrip_str() {
        for ct in [
            ChangeType::Trade,
            ChangeType::Deposit,
            ChangeType::Withdraw,
            ChangeType::Transfer,
        ] {
            assert_eq!(ChangeType::parse(ct.as_str()), Some(ct));
        }
        assert_eq!(ChangeType::parse("despoit"), None);
    }

    #[test]
    fn test_apply_builds_balanced_legs() {
        let cmd = TransferCommand::new(
            "BTCUSDT",
            "alice",
            "bob",
            Decimal::new(25, 1),
            "T1",
            ChangeType::Trade,
        );
        let mut from = Account::zero("alice", "BTCUSDT");
        from.apply(Decimal::from(10));
        let mut to = Account::zero("bob", "BTCUSDT");

        let (debit, credit) = cmd.apply(&mut from, &mut to, Utc::now());

        assert_eq!(debit.before_balance, Decimal::from(10));
        assert_eq!(debit.after_balance, Decimal::new(75, 1));
        assert_eq!(debit.amount, Decimal::new(-25, 1));
        assert_eq!(credit.before_balance, Decimal::ZERO);
        assert_eq!(credit.after_balance, Decimal::new(25, 1));
        assert_eq!(debit.amount + credit.amount, Decimal::ZERO);
        assert!(from.is_consistent());
        assert!(to.is_consistent());
    }
}
