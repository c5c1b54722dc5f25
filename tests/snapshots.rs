mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

use kuberan::accounts::MemoryAccountBook;
use kuberan::clock::ManualClock;
use kuberan::engine::{Engine, EngineConfig};
use kuberan::market_data::{MemoryPriceStore, PriceStore};
use kuberan::models::{
    AccountKind, Holding, Id, LedgerEntry, LedgerRecord, PortfolioSnapshot, PriceObservation,
    Security, UuidIdGenerator,
};
use kuberan::pagination::PageRequest;
use kuberan::portfolio::{SnapshotOutcome, SnapshotSettings};
use kuberan::storage::{MemoryStorage, SnapshotInsert, Storage};
use support::{account, t, trade, Harness};

/// Fails lookups for one security, delegates the rest.
struct BrokenFor {
    security_id: Id,
    inner: MemoryPriceStore,
}

#[async_trait]
impl PriceStore for BrokenFor {
    async fn latest_price(
        &self,
        security_id: &Id,
        as_of: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>> {
        if security_id == &self.security_id {
            anyhow::bail!("price feed unavailable");
        }
        self.inner.latest_price(security_id, as_of).await
    }

    async fn record_prices(&self, prices: &[PriceObservation]) -> Result<usize> {
        self.inner.record_prices(prices).await
    }
}

/// Lookups for one security never return in a reasonable time.
struct StallsFor {
    security_id: Id,
    inner: MemoryPriceStore,
}

#[async_trait]
impl PriceStore for StallsFor {
    async fn latest_price(
        &self,
        security_id: &Id,
        as_of: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>> {
        if security_id == &self.security_id {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.latest_price(security_id, as_of).await
    }

    async fn record_prices(&self, prices: &[PriceObservation]) -> Result<usize> {
        self.inner.record_prices(prices).await
    }
}

/// Writes snapshots, then hangs before reporting back.
struct StallsAfterInsert {
    inner: MemoryStorage,
}

#[async_trait]
impl Storage for StallsAfterInsert {
    async fn get_holding(&self, account_id: &Id, security_id: &Id) -> Result<Option<Holding>> {
        self.inner.get_holding(account_id, security_id).await
    }

    async fn list_holdings(&self, account_ids: &[Id]) -> Result<Vec<Holding>> {
        self.inner.list_holdings(account_ids).await
    }

    async fn commit(&self, records: &[LedgerRecord]) -> Result<()> {
        self.inner.commit(records).await
    }

    async fn list_entries(&self, holding_id: &Id, include_removed: bool) -> Result<Vec<LedgerEntry>> {
        self.inner.list_entries(holding_id, include_removed).await
    }

    async fn get_entry(&self, entry_id: &Id) -> Result<Option<LedgerEntry>> {
        self.inner.get_entry(entry_id).await
    }

    async fn soft_remove_entry(&self, entry_id: &Id, removed_at: DateTime<Utc>) -> Result<bool> {
        self.inner.soft_remove_entry(entry_id, removed_at).await
    }

    async fn get_security(&self, id: &Id) -> Result<Option<Security>> {
        self.inner.get_security(id).await
    }

    async fn list_securities(&self) -> Result<Vec<Security>> {
        self.inner.list_securities().await
    }

    async fn save_security(&self, security: &Security) -> Result<()> {
        self.inner.save_security(security).await
    }

    async fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<SnapshotInsert> {
        let inserted = self.inner.insert_snapshot(snapshot).await?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(inserted)
    }

    async fn get_snapshot(
        &self,
        user_id: &Id,
        recorded_at: DateTime<Utc>,
    ) -> Result<Option<PortfolioSnapshot>> {
        self.inner.get_snapshot(user_id, recorded_at).await
    }

    async fn list_snapshots(
        &self,
        user_id: &Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>> {
        self.inner.list_snapshots(user_id, from, to).await
    }
}

fn short_deadline() -> EngineConfig {
    EngineConfig {
        snapshots: SnapshotSettings {
            concurrency: 2,
            deadline: Duration::from_millis(200),
        },
        ..EngineConfig::default()
    }
}

fn two_users() -> Vec<kuberan::models::Account> {
    vec![
        account("u1-chk", "u1", AccountKind::Cash, 50_000),
        account("u1-brokerage", "u1", AccountKind::Investment, 0),
        account("u2-chk", "u2", AccountKind::Cash, 50_000),
        account("u2-brokerage", "u2", AccountKind::Investment, 0),
    ]
}

#[tokio::test]
async fn net_worth_snapshot_is_recorded_once() -> Result<()> {
    let h = Harness::new(vec![
        account("chk", "u1", AccountKind::Cash, 800_000),
        account("brokerage", "u1", AccountKind::Investment, 0),
        account("loan", "u1", AccountKind::Debt, 200_000),
    ])
    .await?;

    let mut buy = trade("brokerage", "vti", dec!(10), 30_000, 0);
    buy.settlement_account_id = Some(Id::from("chk"));
    h.engine.record_buy(buy).await?;
    h.set_price("vti", 30_000, t(2026, 3, 2, 12)).await?;

    let user = Id::from("u1");
    let at = t(2026, 3, 2, 18);

    let batch = h.engine.compute_snapshots(at, &[user.clone()]).await;
    assert_eq!(batch.recorded, 1);
    assert!(batch.failures.is_empty());

    let page = h
        .engine
        .snapshot_history(&user, at, at, PageRequest::default())
        .await?;
    assert_eq!(page.total_items, 1);
    let snapshot = page.data[0].clone();
    assert_eq!(snapshot.cash_balance, 500_000);
    assert_eq!(snapshot.investment_value, 300_000);
    assert_eq!(snapshot.debt_balance, 200_000);
    assert_eq!(snapshot.total_net_worth, 600_000);

    // A later price must not rewrite the recorded snapshot.
    h.set_price("vti", 40_000, t(2026, 3, 2, 13)).await?;
    let again = h.engine.compute_snapshots(at, &[user.clone()]).await;
    assert_eq!(again.recorded, 0);
    assert_eq!(again.already_recorded, 1);

    let page = h
        .engine
        .snapshot_history(&user, at, at, PageRequest::default())
        .await?;
    assert_eq!(page.total_items, 1);
    assert_eq!(page.data[0], snapshot);
    Ok(())
}

#[tokio::test]
async fn default_settled_buy_leaves_net_worth_unchanged() -> Result<()> {
    let h = Harness::new(vec![
        account("chk", "u1", AccountKind::Cash, 100_000),
        // Investment account balances are not cash.
        account("brokerage", "u1", AccountKind::Investment, 5_000),
    ])
    .await?;

    let buy = h.engine.record_buy(trade("brokerage", "vti", dec!(2), 10_000, 0)).await?;
    assert_eq!(buy.entry.settlement_account_id, Some(Id::from("chk")));
    h.set_price("vti", 10_000, t(2026, 3, 2, 12)).await?;

    let outcome = h.engine.snapshot_user(&Id::from("u1"), t(2026, 3, 2, 18)).await?;
    let snapshot = outcome.snapshot();
    assert_eq!(snapshot.cash_balance, 80_000);
    assert_eq!(snapshot.investment_value, 20_000);
    assert_eq!(snapshot.debt_balance, 0);
    assert_eq!(snapshot.total_net_worth, 100_000);
    Ok(())
}

#[tokio::test]
async fn snapshot_user_reports_existing() -> Result<()> {
    let h = Harness::new(vec![account("chk", "u1", AccountKind::Cash, 1_000)]).await?;
    let at = t(2026, 4, 1, 0);

    let first = h.engine.snapshot_user(&Id::from("u1"), at).await?;
    assert!(first.is_recorded());
    let second = h.engine.snapshot_user(&Id::from("u1"), at).await?;
    assert!(matches!(second, SnapshotOutcome::Existing(_)));
    assert_eq!(second.snapshot(), first.snapshot());
    Ok(())
}

#[tokio::test]
async fn one_failing_user_does_not_stop_the_batch() -> Result<()> {
    let prices = Arc::new(BrokenFor {
        security_id: Id::from("btc"),
        inner: MemoryPriceStore::new(),
    });
    let h = Harness::with_prices(two_users(), prices, EngineConfig::default()).await?;
    h.engine.record_buy(trade("u1-brokerage", "vti", dec!(1), 10_000, 0)).await?;
    h.engine.record_buy(trade("u2-brokerage", "btc", dec!(0.1), 100_000, 0)).await?;
    h.set_price("vti", 11_000, t(2026, 3, 2, 12)).await?;

    let at = t(2026, 3, 3, 0);
    let batch = h
        .engine
        .compute_snapshots(at, &[Id::from("u1"), Id::from("u2")])
        .await;

    assert_eq!(batch.recorded, 1);
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].user_id, Id::from("u2"));
    assert!(batch.cancelled.is_empty());

    let u1 = h
        .engine
        .snapshot_history(&Id::from("u1"), at, at, PageRequest::default())
        .await?;
    assert_eq!(u1.data[0].investment_value, 11_000);
    assert_eq!(u1.data[0].total_net_worth, 40_000 + 11_000);

    let u2 = h
        .engine
        .snapshot_history(&Id::from("u2"), at, at, PageRequest::default())
        .await?;
    assert_eq!(u2.total_items, 0);
    Ok(())
}

#[tokio::test]
async fn deadline_cancels_stragglers_and_keeps_finished_work() -> Result<()> {
    let prices = Arc::new(StallsFor {
        security_id: Id::from("btc"),
        inner: MemoryPriceStore::new(),
    });
    let h = Harness::with_prices(two_users(), prices, short_deadline()).await?;
    h.engine.record_buy(trade("u2-brokerage", "btc", dec!(0.1), 100_000, 0)).await?;

    let at = t(2026, 3, 3, 0);
    let batch = h
        .engine
        .compute_snapshots(at, &[Id::from("u1"), Id::from("u2")])
        .await;

    assert_eq!(batch.recorded, 1);
    assert_eq!(batch.cancelled, vec![Id::from("u2")]);

    let u1 = h
        .engine
        .snapshot_history(&Id::from("u1"), at, at, PageRequest::default())
        .await?;
    assert_eq!(u1.total_items, 1);
    let u2 = h
        .engine
        .snapshot_history(&Id::from("u2"), at, at, PageRequest::default())
        .await?;
    assert_eq!(u2.total_items, 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_user_may_already_be_recorded() -> Result<()> {
    let storage = Arc::new(StallsAfterInsert {
        inner: MemoryStorage::new(),
    });
    let accounts = Arc::new(MemoryAccountBook::with_accounts(vec![account(
        "chk",
        "u1",
        AccountKind::Cash,
        7_500,
    )]));
    let engine = Engine::new(
        storage.clone(),
        Arc::new(MemoryPriceStore::new()),
        accounts,
        Arc::new(ManualClock::new(t(2026, 3, 2, 15))),
        Arc::new(UuidIdGenerator),
        short_deadline(),
    );

    let at = t(2026, 3, 3, 0);
    let first = engine.compute_snapshots(at, &[Id::from("u1")]).await;
    assert_eq!(first.recorded, 0);
    assert_eq!(first.cancelled, vec![Id::from("u1")]);

    let written = storage.get_snapshot(&Id::from("u1"), at).await?;
    assert_eq!(written.map(|s| s.total_net_worth), Some(7_500));

    let again = engine.compute_snapshots(at, &[Id::from("u1")]).await;
    assert_eq!(again.already_recorded, 1);
    assert!(again.cancelled.is_empty());
    Ok(())
}
