//! Order ownership lookup

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;

use crate::ledger::error::DbContext;
use crate::ledger::LedgerError;

/// Resolves which user placed an order.
#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn owner(&self, order_id: &str) -> Result<Option<String>, LedgerError>;
}

/// Reads the matching engine's `orders` table.
pub struct PgOrderDirectory {
    pool: PgPool,
}

impl PgOrderDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderDirectory for PgOrderDirectory {
    async fn owner(&self, order_id: &str) -> Result<Option<String>, LedgerError> {
        sqlx::query_scalar::<_, String>("SELECT user_id FROM orders WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .context("query order owner")
    }
}

#[derive(Default)]
pub struct MemoryOrderDirectory {
    owners: DashMap<String, String>,
}

impl MemoryOrderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order_id: impl Into<String>, user_id: impl Into<String>) {
        self.owners.insert(order_id.into(), user_id.into());
    }
}

#[async_trait]
impl OrderDirectory for MemoryOrderDirectory {
    async fn owner(&self, order_id: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.owners.get(order_id).map(|u| u.clone()))
    }
}
