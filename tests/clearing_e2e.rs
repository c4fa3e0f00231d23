//! End-to-end clearing over the in-memory queue, counter store and ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use clearing_core::clearing::{ClearingService, MemoryOrderDirectory, ServiceSettings};
use clearing_core::ledger::{
    Account, LedgerError, LedgerStore, MemoryLedger, TransferCommand, TransferLogEntry,
    trade_transfer_id,
};
use clearing_core::lock::{ClearingLocks, LockCoordinator, MemoryCounterStore};
use clearing_core::queue::{MemoryQueue, TradeQueue};

const SYMBOL: &str = "BTCUSDT";
const TRADE_KEY: &str = "trade.result.BTCUSDT";
const QUOTE_KEY: &str = "quote.trade.result.BTCUSDT";

/// Holds back every transfer paying `slow_buyer` so that later events get a
/// chance to overtake it.
struct SlowLedger {
    inner: Arc<MemoryLedger>,
    slow_buyer: &'static str,
    delay: Duration,
}

#[async_trait]
impl LedgerStore for SlowLedger {
    async fn transfer(&self, cmd: TransferCommand) -> Result<(), LedgerError> {
        if cmd.to_user == self.slow_buyer {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.transfer(cmd).await
    }

    async fn account(&self, user_id: &str, symbol: &str) -> Result<Account, LedgerError> {
        self.inner.account(user_id, symbol).await
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<TransferLogEntry>, LedgerError> {
        self.inner.recent_logs(limit).await
    }

    async fn logs_by_transfer(
        &self,
        transfer_id: &str,
    ) -> Result<Vec<TransferLogEntry>, LedgerError> {
        self.inner.logs_by_transfer(transfer_id).await
    }
}

struct Cluster {
    queue: Arc<MemoryQueue>,
    ledger: Arc<MemoryLedger>,
    locks: Arc<ClearingLocks>,
    service: ClearingService,
}

fn directory() -> Arc<MemoryOrderDirectory> {
    let directory = Arc::new(MemoryOrderDirectory::new());
    for (order, user) in [
        ("A1", "s1"),
        ("A2", "s2"),
        ("B1", "b1"),
        ("B2", "b2"),
        ("B3", "b3"),
    ] {
        directory.insert(order, user);
    }
    directory
}

fn cluster_with(
    symbols: &[&str],
    ledger: Arc<MemoryLedger>,
    store: Arc<dyn LedgerStore>,
) -> Cluster {
    let queue = Arc::new(MemoryQueue::new());
    let locks = Arc::new(ClearingLocks::new(
        Arc::new(MemoryCounterStore::new()),
        Duration::from_secs(300),
        Duration::from_millis(10),
    ));
    let settings = ServiceSettings {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        poll_interval: Duration::from_millis(5),
        ..ServiceSettings::default()
    };
    let service = ClearingService::new(
        queue.clone(),
        store,
        locks.clone(),
        directory(),
        settings,
    );
    Cluster {
        queue,
        ledger,
        locks,
        service,
    }
}

fn cluster(symbols: &[&str]) -> Cluster {
    let ledger = Arc::new(MemoryLedger::default());
    cluster_with(symbols, ledger.clone(), ledger)
}

fn slow_cluster(slow_buyer: &'static str) -> Cluster {
    let ledger = Arc::new(MemoryLedger::default());
    let slow = Arc::new(SlowLedger {
        inner: ledger.clone(),
        slow_buyer,
        delay: Duration::from_millis(150),
    });
    cluster_with(&[SYMBOL], ledger, slow)
}

fn trade(symbol: &str, ask: &str, bid: &str, last: &str, amount: &str) -> Vec<u8> {
    format!(
        r#"{{"symbol":"{}","askOrderId":"{}","bidOrderId":"{}","last":"{}","price":"50000","amount":"{}","tradeTimestamp":1700000000000}}"#,
        symbol, ask, bid, last, amount
    )
    .into_bytes()
}

async fn wait_for_legs(ledger: &MemoryLedger, legs: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while ledger.all_logs().await.len() < legs {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("settlements should complete");
}

/// Locks are released after the commit, so legs can be visible first.
async fn wait_for_release(locks: &ClearingLocks, orders: &[&str]) {
    tokio::time::timeout(Duration::from_secs(5), async {
        for order in orders {
            while locks.read_counter(order).await != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    })
    .await
    .expect("locks should be released");
}

#[tokio::test]
async fn test_single_trade_settles() {
    let c = cluster(&[SYMBOL]);
    let handle = c.service.start();
    c.queue
        .push(TRADE_KEY, trade(SYMBOL, "A1", "B1", "", "10"))
        .await
        .unwrap();

    wait_for_legs(&c.ledger, 2).await;
    wait_for_release(&c.locks, &["A1", "B1"]).await;
    handle.shutdown().await;

    let transfer_id = trade_transfer_id("A1", "B1");
    let legs = c.ledger.logs_by_transfer(&transfer_id).await.unwrap();
    assert_eq!(legs.len(), 2);
    assert_eq!(
        legs.iter().map(|l| l.amount).sum::<Decimal>(),
        Decimal::ZERO
    );

    let seller = c.ledger.account("s1", SYMBOL).await.unwrap();
    let buyer = c.ledger.account("b1", SYMBOL).await.unwrap();
    assert_eq!(seller.total_balance, Decimal::from(-10));
    assert_eq!(buyer.total_balance, Decimal::from(10));

    assert_eq!(
        c.queue.try_pop(QUOTE_KEY).await.unwrap(),
        Some(trade(SYMBOL, "A1", "B1", "", "10"))
    );
}

#[tokio::test]
async fn test_dependent_fill_commits_after_its_predecessor() {
    // B1's transfer is slow; the second fill of A1 must still wait for it.
    let c = slow_cluster("b1");
    let handle = c.service.start();
    c.queue
        .push(TRADE_KEY, trade(SYMBOL, "A1", "B1", "", "3"))
        .await
        .unwrap();
    c.queue
        .push(TRADE_KEY, trade(SYMBOL, "A1", "B2", "A1", "4"))
        .await
        .unwrap();

    wait_for_legs(&c.ledger, 4).await;
    wait_for_release(&c.locks, &["A1", "B1", "B2"]).await;
    handle.shutdown().await;

    let order: Vec<String> = c
        .ledger
        .all_logs()
        .await
        .into_iter()
        .map(|l| l.transfer_id)
        .collect();
    let first = trade_transfer_id("A1", "B1");
    let second = trade_transfer_id("A1", "B2");
    assert_eq!(order, vec![first.clone(), first, second.clone(), second]);

    let seller = c.ledger.account("s1", SYMBOL).await.unwrap();
    assert_eq!(seller.total_balance, Decimal::from(-7));
    assert_eq!(c.locks.pending_waits(), 0);
}

#[tokio::test]
async fn test_independent_fills_may_overtake() {
    let c = slow_cluster("b1");
    let handle = c.service.start();
    c.queue
        .push(TRADE_KEY, trade(SYMBOL, "A1", "B1", "", "3"))
        .await
        .unwrap();
    c.queue
        .push(TRADE_KEY, trade(SYMBOL, "A2", "B2", "", "4"))
        .await
        .unwrap();

    wait_for_legs(&c.ledger, 4).await;
    handle.shutdown().await;

    let logs = c.ledger.all_logs().await;
    assert_eq!(logs[0].transfer_id, trade_transfer_id("A2", "B2"));
    assert_eq!(logs[3].transfer_id, trade_transfer_id("A1", "B1"));
}

#[tokio::test]
async fn test_malformed_payload_does_not_stall_watcher() {
    let c = cluster(&[SYMBOL]);
    c.queue.push(TRADE_KEY, b"{not json".to_vec()).await.unwrap();
    c.queue
        .push(TRADE_KEY, trade(SYMBOL, "A1", "B1", "", "1"))
        .await
        .unwrap();
    let handle = c.service.start();

    wait_for_legs(&c.ledger, 2).await;
    handle.shutdown().await;

    assert_eq!(c.queue.len(TRADE_KEY).await.unwrap(), 0);
    assert_eq!(c.queue.len(QUOTE_KEY).await.unwrap(), 1);
}

#[tokio::test]
async fn test_symbols_are_cleared_independently() {
    let c = cluster(&["BTCUSDT", "ETHUSDT"]);
    let handle = c.service.start();
    assert_eq!(handle.watcher_count(), 2);

    c.queue
        .push(TRADE_KEY, trade("BTCUSDT", "A1", "B1", "", "1"))
        .await
        .unwrap();
    c.queue
        .push("trade.result.ETHUSDT", trade("ETHUSDT", "A2", "B2", "", "5"))
        .await
        .unwrap();

    wait_for_legs(&c.ledger, 4).await;
    handle.shutdown().await;

    assert_eq!(
        c.ledger.account("b1", "BTCUSDT").await.unwrap().total_balance,
        Decimal::ONE
    );
    assert_eq!(
        c.ledger.account("b2", "ETHUSDT").await.unwrap().total_balance,
        Decimal::from(5)
    );
    assert_eq!(c.queue.len(QUOTE_KEY).await.unwrap(), 1);
    assert_eq!(c.queue.len("quote.trade.result.ETHUSDT").await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fills_keep_seller_balance_exact() {
    let c = cluster(&[SYMBOL]);
    let handle = c.service.start();

    let buyers = ["B1", "B2", "B3"];
    for i in 0..30 {
        c.queue
            .push(TRADE_KEY, trade(SYMBOL, "A1", buyers[i % 3], "", "1"))
            .await
            .unwrap();
    }

    wait_for_legs(&c.ledger, 60).await;
    wait_for_release(&c.locks, &["A1", "B1", "B2", "B3"]).await;
    handle.shutdown().await;

    let seller = c.ledger.account("s1", SYMBOL).await.unwrap();
    assert_eq!(seller.total_balance, Decimal::from(-30));
    let bought: Decimal = {
        let mut total = Decimal::ZERO;
        for user in ["b1", "b2", "b3"] {
            total += c.ledger.account(user, SYMBOL).await.unwrap().total_balance;
        }
        total
    };
    assert_eq!(bought, Decimal::from(30));
}
