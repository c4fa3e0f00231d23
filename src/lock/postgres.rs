//! PostgreSQL counter store
//!
//! `clearing_counters` rows shared by every clearing process. Expiry is
//! lazy, as in the in-memory store: an expired row reads as absent and the
//! next increment or decrement restarts it from zero without a TTL.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::LockError;
use super::store::CounterStore;

const ADD: &str = r#"
    INSERT INTO clearing_counters (counter_key, value, expires_at)
    VALUES ($1, $2, NULL)
    ON CONFLICT (counter_key) DO UPDATE SET
        value = CASE
            WHEN clearing_counters.expires_at <= NOW() THEN EXCLUDED.value
            ELSE clearing_counters.value + EXCLUDED.value
        END,
        expires_at = CASE
            WHEN clearing_counters.expires_at <= NOW() THEN NULL
            ELSE clearing_counters.expires_at
        END
    RETURNING value
"#;

const EXPIRE: &str = r#"
    UPDATE clearing_counters
    SET expires_at = NOW() + make_interval(secs => $2)
    WHERE counter_key = $1 AND (expires_at IS NULL OR expires_at > NOW())
"#;

const GET: &str = r#"
    SELECT value FROM clearing_counters
    WHERE counter_key = $1 AND (expires_at IS NULL OR expires_at > NOW())
"#;

pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64, LockError> {
        sqlx::query_scalar(ADD)
            .bind(key)
            .bind(delta)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)
    }
}

fn unavailable(e: sqlx::Error) -> LockError {
    LockError::Unavailable(e.to_string())
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, LockError> {
        self.add(key, 1).await
    }

    async fn decr(&self, key: &str) -> Result<i64, LockError> {
        self.add(key, -1).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let res = sqlx::query(EXPIRE)
            .bind(key)
            .bind(ttl.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(res.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, LockError> {
        sqlx::query_scalar(GET)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)
    }
}
