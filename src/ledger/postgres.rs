//! PostgreSQL ledger
//!
//! Tables `accounts` and `transfer_log` (see `sql/clearing_schema.sql`).
//! Each transfer is one transaction; dropping the transaction on an early
//! return rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::error::DbContext;
use super::{
    Account, ChangeType, LedgerError, LedgerStore, LockMode, TransferCommand, TransferLogEntry,
    validate,
};

const SELECT_ACCOUNT: &str = r#"
    SELECT id, user_id, symbol, total_balance, available_balance, frozen_balance
    FROM accounts
    WHERE user_id = $1 AND symbol = $2
    LIMIT 1
"#;

const SELECT_ACCOUNT_FOR_UPDATE: &str = r#"
    SELECT id, user_id, symbol, total_balance, available_balance, frozen_balance
    FROM accounts
    WHERE user_id = $1 AND symbol = $2
    FOR UPDATE
"#;

const ENSURE_ACCOUNT: &str = r#"
    INSERT INTO accounts (id, user_id, symbol, created_at, updated_at)
    VALUES ($1, $2, $3, NOW(), NOW())
    ON CONFLICT (user_id, symbol) DO NOTHING
"#;

const SELECT_LOGS: &str = r#"
    SELECT user_id, symbol, before_balance, amount, after_balance,
           transfer_id, change_type, info, created_at
    FROM transfer_log
"#;

/// Account snapshot plus its row id, `None` until the row exists.
struct AccountRow {
    id: Option<Uuid>,
    account: Account,
}

pub struct PgLedger {
    pool: PgPool,
    mode: LockMode,
}

impl PgLedger {
    pub fn new(pool: PgPool, mode: LockMode) -> Self {
        Self { pool, mode }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    async fn fetch_account(
        conn: &mut PgConnection,
        user_id: &str,
        symbol: &str,
        for_update: bool,
    ) -> Result<AccountRow, LedgerError> {
        let sql = if for_update {
            SELECT_ACCOUNT_FOR_UPDATE
        } else {
            SELECT_ACCOUNT
        };
        let row = sqlx::query(sql)
            .bind(user_id)
            .bind(symbol)
            .fetch_optional(&mut *conn)
            .await
            .context("query account")?;

        match row {
            Some(row) => Ok(AccountRow {
                id: Some(row.try_get("id").context("decode account id")?),
                account: row_to_account(&row)?,
            }),
            None => Ok(AccountRow {
                id: None,
                account: Account::zero(user_id, symbol),
            }),
        }
    }

    /// `FOR UPDATE` locks nothing on a missing row, so first-touch accounts
    /// are created empty before locking.
    async fn ensure_account(
        conn: &mut PgConnection,
        user_id: &str,
        symbol: &str,
    ) -> Result<(), LedgerError> {
        sqlx::query(ENSURE_ACCOUNT)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(symbol)
            .execute(&mut *conn)
            .await
            .context("create account")?;
        Ok(())
    }

    /// Lock both rows in a fixed order so two opposite transfers cannot
    /// deadlock each other.
    async fn fetch_pair_for_update(
        conn: &mut PgConnection,
        cmd: &TransferCommand,
    ) -> Result<(AccountRow, AccountRow), LedgerError> {
        let (first, second) = if cmd.from_user <= cmd.to_user {
            (&cmd.from_user, &cmd.to_user)
        } else {
            (&cmd.to_user, &cmd.from_user)
        };
        Self::ensure_account(conn, first, &cmd.symbol).await?;
        Self::ensure_account(conn, second, &cmd.symbol).await?;

        if cmd.from_user <= cmd.to_user {
            let from = Self::fetch_account(conn, &cmd.from_user, &cmd.symbol, true).await?;
            let to = Self::fetch_account(conn, &cmd.to_user, &cmd.symbol, true).await?;
            Ok((from, to))
        } else {
            let to = Self::fetch_account(conn, &cmd.to_user, &cmd.symbol, true).await?;
            let from = Self::fetch_account(conn, &cmd.from_user, &cmd.symbol, true).await?;
            Ok((from, to))
        }
    }

    async fn upsert_account(
        conn: &mut PgConnection,
        row: &AccountRow,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        let acc = &row.account;
        match row.id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE accounts
                    SET total_balance = $1, available_balance = $2, updated_at = $3
                    WHERE id = $4
                    "#,
                )
                .bind(acc.total_balance)
                .bind(acc.available_balance)
                .bind(now)
                .bind(id)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO accounts
                        (id, user_id, symbol, total_balance, available_balance, frozen_balance, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&acc.user_id)
                .bind(&acc.symbol)
                .bind(acc.total_balance)
                .bind(acc.available_balance)
                .bind(acc.frozen_balance)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }

    async fn insert_log(
        conn: &mut PgConnection,
        entry: &TransferLogEntry,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO transfer_log
                (id, user_id, symbol, before_balance, amount, after_balance,
                 transfer_id, change_type, info, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.user_id)
        .bind(&entry.symbol)
        .bind(entry.before_balance)
        .bind(entry.amount)
        .bind(entry.after_balance)
        .bind(&entry.transfer_id)
        .bind(entry.change_type.as_str())
        .bind(&entry.info)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn transfer(&self, cmd: TransferCommand) -> Result<(), LedgerError> {
        validate(&cmd)?;

        let snapshots = match self.mode {
            LockMode::Snapshot => {
                let mut conn = self.pool.acquire().await.context("acquire connection")?;
                let from = Self::fetch_account(&mut *conn, &cmd.from_user, &cmd.symbol, false)
                    .await?;
                let to = Self::fetch_account(&mut *conn, &cmd.to_user, &cmd.symbol, false).await?;
                Some((from, to))
            }
            LockMode::RowLock => None,
        };

        let mut tx = self.pool.begin().await.context("begin tx")?;

        let (mut from, mut to) = match snapshots {
            Some(pair) => pair,
            None => Self::fetch_pair_for_update(&mut *tx, &cmd).await?,
        };

        let now = Utc::now();
        let (debit, credit) = cmd.apply(&mut from.account, &mut to.account, now);

        Self::upsert_account(&mut *tx, &from, now)
            .await
            .context("update from account")?;
        Self::upsert_account(&mut *tx, &to, now)
            .await
            .context("update to account")?;
        Self::insert_log(&mut *tx, &debit)
            .await
            .context("create from log")?;
        Self::insert_log(&mut *tx, &credit)
            .await
            .context("create to log")?;

        tx.commit().await.context("commit tx")?;

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
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        Ok(Self::fetch_account(&mut *conn, user_id, symbol, false)
            .await?
            .account)
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<TransferLogEntry>, LedgerError> {
        let sql = format!("{} ORDER BY created_at DESC LIMIT $1", SELECT_LOGS);
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("query transfer logs")?;
        rows.iter().map(row_to_log).collect()
    }

    async fn logs_by_transfer(
        &self,
        transfer_id: &str,
    ) -> Result<Vec<TransferLogEntry>, LedgerError> {
        let sql = format!(
            "{} WHERE transfer_id = $1 ORDER BY created_at ASC, amount ASC",
            SELECT_LOGS
        );
        let rows = sqlx::query(&sql)
            .bind(transfer_id)
            .fetch_all(&self.pool)
            .await
            .context("query transfer logs")?;
        rows.iter().map(row_to_log).collect()
    }
}

fn row_to_account(row: &PgRow) -> Result<Account, LedgerError> {
    Ok(Account {
        user_id: row.try_get("user_id").context("decode account")?,
        symbol: row.try_get("symbol").context("decode account")?,
        total_balance: row.try_get::<Decimal, _>("total_balance").context("decode account")?,
        available_balance: row
            .try_get::<Decimal, _>("available_balance")
            .context("decode account")?,
        frozen_balance: row
            .try_get::<Decimal, _>("frozen_balance")
            .context("decode account")?,
    })
}

fn row_to_log(row: &PgRow) -> Result<TransferLogEntry, LedgerError> {
    let change_type: String = row.try_get("change_type").context("decode transfer log")?;
    let change_type = ChangeType::parse(&change_type)
        .ok_or_else(|| LedgerError::CorruptRow(format!("unknown change_type: {}", change_type)))?;

    Ok(TransferLogEntry {
        user_id: row.try_get("user_id").context("decode transfer log")?,
        symbol: row.try_get("symbol").context("decode transfer log")?,
        before_balance: row.try_get("before_balance").context("decode transfer log")?,
        amount: row.try_get("amount").context("decode transfer log")?,
        after_balance: row.try_get("after_balance").context("decode transfer log")?,
        transfer_id: row.try_get("transfer_id").context("decode transfer log")?,
        change_type,
        info: row
            .try_get::<Option<String>, _>("info")
            .context("decode transfer log")?
            .unwrap_or_default(),
        created_at: row.try_get("created_at").context("decode transfer log")?,
    })
}
