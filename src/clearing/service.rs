//! Clearing service: one watcher per configured symbol.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::directory::OrderDirectory;
use super::dispatch::{DispatchPolicy, Dispatcher};
use super::quote::QuoteForwarder;
use super::watcher::SymbolWatcher;
use super::worker::SettlementWorker;
use crate::config::ClearingConfig;
use crate::ledger::LedgerStore;
use crate::lock::LockCoordinator;
use crate::queue::TradeQueue;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub symbols: Vec<String>,
    pub poll_interval: Duration,
    pub dependency_timeout: Option<Duration>,
    pub forward_quotes: bool,
    pub dispatch: DispatchPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            poll_interval: Duration::from_millis(50),
            dependency_timeout: None,
            forward_quotes: true,
            dispatch: DispatchPolicy::Unbounded,
        }
    }
}

impl From<&ClearingConfig> for ServiceSettings {
    fn from(config: &ClearingConfig) -> Self {
        Self {
            symbols: config.symbols.clone(),
            poll_interval: config.poll_interval(),
            dependency_timeout: config.dependency_timeout(),
            forward_quotes: config.forward_quotes,
            dispatch: config.dispatch_policy(),
        }
    }
}

/// Running watchers. Dropping this does not stop them; call [`shutdown`].
///
/// [`shutdown`]: ClearingHandle::shutdown
pub struct ClearingHandle {
    shutdown_tx: watch::Sender<bool>,
    watchers: Vec<JoinHandle<()>>,
}

impl ClearingHandle {
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Stop polling and wait for every watcher to exit. Settlements already
    /// dispatched keep running.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.watchers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Symbol watcher panicked");
            }
        }
    }
}

pub struct ClearingService {
    queue: Arc<dyn TradeQueue>,
    worker: Arc<SettlementWorker>,
    settings: ServiceSettings,
}

impl ClearingService {
    pub fn new(
        queue: Arc<dyn TradeQueue>,
        ledger: Arc<dyn LedgerStore>,
        locks: Arc<dyn LockCoordinator>,
        directory: Arc<dyn OrderDirectory>,
        settings: ServiceSettings,
    ) -> Self {
        let worker = Arc::new(SettlementWorker::new(
            ledger,
            locks,
            directory,
            settings.dependency_timeout,
        ));
        Self {
            queue,
            worker,
            settings,
        }
    }

    pub fn worker(&self) -> Arc<SettlementWorker> {
        self.worker.clone()
    }

    /// Spawn a watcher for every configured symbol.
    pub fn start(&self) -> ClearingHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(self.settings.dispatch);
        let quotes = QuoteForwarder::new(self.queue.clone(), self.settings.forward_quotes);

        let watchers = self
            .settings
            .symbols
            .iter()
            .map(|symbol| {
                let watcher = SymbolWatcher::new(
                    symbol,
                    self.queue.clone(),
                    self.worker.clone(),
                    dispatcher.clone(),
                    quotes.clone(),
                    self.settings.poll_interval,
                );
                tokio::spawn(watcher.run(shutdown_rx.clone()))
            })
            .collect::<Vec<_>>();

        info!(
            symbols = ?self.settings.symbols,
            dispatch = ?self.settings.dispatch,
            "Clearing started"
        );
        ClearingHandle {
            shutdown_tx,
            watchers,
        }
    }
}
