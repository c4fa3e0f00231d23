//! Clearing Core
//!
//! ```text
//! ┌──────────────┐    ┌───────────────┐    ┌──────────────┐
//! │ trade.result │───▶│   Watchers    │───▶│    Ledger    │
//! │  (per sym)   │    │ (per symbol)  │    │ (PG/memory)  │
//! └──────────────┘    └───────┬───────┘    └──────────────┘
//!                             ▼
//!                    quote.trade.result
//! ```
//!
//! Usage: `clearing [--env|-e <name>]`, loads `config/<name>.yaml`.
//!
//! With `clearing.transport: postgres` producers feed the service by
//! inserting into `clearing_queue`:
//!
//! ```sql
//! INSERT INTO clearing_queue (queue_key, payload)
//! VALUES ('trade.result.BTCUSDT', convert_to('{"symbol":"BTCUSDT",...}', 'UTF8'));
//! ```

use std::sync::Arc;

use anyhow::Context;
use clearing_core::clearing::{
    ClearingService, MemoryOrderDirectory, OrderDirectory, PgOrderDirectory, ServiceSettings,
};
use clearing_core::config::{AppConfig, TransportConfig};
use clearing_core::db::Database;
use clearing_core::ledger::{LedgerStore, MemoryLedger, PgLedger};
use clearing_core::lock::{ClearingLocks, CounterStore, MemoryCounterStore, PgCounterStore};
use clearing_core::logging::init_logging;
use clearing_core::queue::{MemoryQueue, PgTradeQueue, TradeQueue};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    tracing::info!("Starting clearing core in {} mode", env);

    let clearing = &app_config.clearing;
    let db = match &app_config.postgres_url {
        Some(url) => {
            let db = Database::connect(url, app_config.postgres_max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.health_check()
                .await
                .context("PostgreSQL health check failed")?;
            Some(db)
        }
        None => None,
    };

    let ledger: Arc<dyn LedgerStore>;
    let directory: Arc<dyn OrderDirectory>;
    match &db {
        Some(db) => {
            ledger = Arc::new(PgLedger::new(db.pool().clone(), clearing.lock_mode()));
            directory = Arc::new(PgOrderDirectory::new(db.pool().clone()));
        }
        None => {
            tracing::warn!(
                "No postgres_url configured, using in-memory ledger; \
                 trades must carry askUserId/bidUserId"
            );
            ledger = Arc::new(MemoryLedger::new(clearing.lock_mode()));
            directory = Arc::new(MemoryOrderDirectory::new());
        }
    }

    let queue: Arc<dyn TradeQueue>;
    let counters: Arc<dyn CounterStore>;
    match (clearing.transport, &db) {
        (TransportConfig::Postgres, Some(db)) => {
            queue = Arc::new(PgTradeQueue::new(db.pool().clone()));
            counters = Arc::new(PgCounterStore::new(db.pool().clone()));
        }
        (TransportConfig::Postgres, None) => {
            anyhow::bail!("transport: postgres requires postgres_url");
        }
        (TransportConfig::Memory, _) => {
            tracing::warn!(
                "Memory transport: trade queues are private to this process, \
                 no external producer can reach them"
            );
            queue = Arc::new(MemoryQueue::new());
            counters = Arc::new(MemoryCounterStore::new());
        }
    }

    let locks = Arc::new(ClearingLocks::new(
        counters,
        clearing.lock_ttl(),
        clearing.dependency_poll(),
    ));

    if clearing.symbols.is_empty() {
        tracing::warn!("No symbols configured, nothing to clear");
    }

    let service = ClearingService::new(
        queue,
        ledger,
        locks,
        directory,
        ServiceSettings::from(clearing),
    );
    let handle = service.start();
    tracing::info!(watchers = handle.watcher_count(), "Clearing core running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    handle.shutdown().await;
    tracing::info!("Clearing core stopped");
    Ok(())
}
