//! In-process ledger
//!
//! Same contract as [`super::PgLedger`] with the whole store behind one async
//! mutex. Used when no PostgreSQL URL is configured and throughout the tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{
    Account, LedgerError, LedgerStore, LockMode, TransferCommand, TransferLogEntry, validate,
};

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<(String, String), Account>,
    /// Commit order
    logs: Vec<TransferLogEntry>,
}

impl LedgerState {
    fn snapshot(&self, user_id: &str, symbol: &str) -> Account {
        self.accounts
            .get(&(user_id.to_string(), symbol.to_string()))
            .cloned()
            .unwrap_or_else(|| Account::zero(user_id, symbol))
    }

    fn commit(&mut self, from: Account, to: Account, legs: [TransferLogEntry; 2]) {
        self.accounts
            .insert((from.user_id.clone(), from.symbol.clone()), from);
        self.accounts.insert((to.user_id.clone(), to.symbol.clone()), to);
        self.logs.extend(legs);
    }
}

pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    mode: LockMode,
    fail_commits: AtomicBool,
}

impl MemoryLedger {
    pub fn new(mode: LockMode) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            mode,
            fail_commits: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Make every following transfer fail at its last step, as a lost
    /// connection right before COMMIT would.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Every log entry in commit order.
    pub async fn all_logs(&self) -> Vec<TransferLogEntry> {
        self.state.lock().await.logs.clone()
    }

    /// Number of materialized account rows.
    pub async fn account_rows(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    fn check_commit(&self) -> Result<(), LedgerError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(LedgerError::Database {
                context: "commit tx",
                source: sqlx::Error::Protocol("connection reset".to_string()),
            });
        }
        Ok(())
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(LockMode::default())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn transfer(&self, cmd: TransferCommand) -> Result<(), LedgerError> {
        validate(&cmd)?;

        match self.mode {
            LockMode::RowLock => {
                let mut state = self.state.lock().await;
                let mut from = state.snapshot(&cmd.from_user, &cmd.symbol);
                let mut to = state.snapshot(&cmd.to_user, &cmd.symbol);
                let (debit, credit) = cmd.apply(&mut from, &mut to, Utc::now());
                self.check_commit()?;
                state.commit(from, to, [debit, credit]);
            }
            LockMode::Snapshot => {
                let (mut from, mut to) = {
                    let state = self.state.lock().await;
                    (
                        state.snapshot(&cmd.from_user, &cmd.symbol),
                        state.snapshot(&cmd.to_user, &cmd.symbol),
                    )
                };
                // between the snapshot read and BEGIN other transfers may commit
                tokio::task::yield_now().await;
                let (debit, credit) = cmd.apply(&mut from, &mut to, Utc::now());
                let mut state = self.state.lock().await;
                self.check_commit()?;
                state.commit(from, to, [debit, credit]);
            }
        }

        tracing::debug!(
            transfer_id = %cmd.transfer_id,
            symbol = %cmd.symbol,
            from = %cmd.from_user,
            to = %cmd.to_user,
            amount = %cmd.amount,
            "Transfer committed"
        );
        Ok(())
    }

    async fn account(&self, user_id: &str, symbol: &str) -> Result<Account, LedgerError> {
        Ok(self.state.lock().await.snapshot(user_id, symbol))
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<TransferLogEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.logs.iter().rev().take(limit).cloned().collect())
    }

    async fn logs_by_transfer(
        &self,
        transfer_id: &str,
    ) -> Result<Vec<TransferLogEntry>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|e| e.transfer_id == transfer_id)
            .cloned()
            .collect())
    }
}
