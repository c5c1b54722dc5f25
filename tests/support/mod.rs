#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use kuberan::accounts::{AccountBalances, MemoryAccountBook};
use kuberan::clock::ManualClock;
use kuberan::engine::{Engine, EngineConfig};
use kuberan::ledger::TradeRequest;
use kuberan::market_data::{MemoryPriceStore, PriceStore};
use kuberan::models::{
    Account, AccountKind, AssetClass, Id, PriceObservation, Security, UuidIdGenerator,
};
use kuberan::money::MinorUnits;
use kuberan::storage::{MemoryStorage, Storage};

pub fn t(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn security(id: &str, symbol: &str, asset_class: AssetClass) -> Security {
    Security {
        id: Id::from(id),
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        asset_class,
        currency: "USD".to_string(),
        exchange: None,
    }
}

pub fn account(id: &str, user: &str, kind: AccountKind, balance: MinorUnits) -> Account {
    Account::new(Id::from(id), Id::from(user), id, kind).with_balance(balance)
}

pub fn price(security_id: &str, price: MinorUnits, at: DateTime<Utc>) -> PriceObservation {
    PriceObservation {
        security_id: Id::from(security_id),
        price,
        recorded_at: at,
        source: "test".to_string(),
    }
}

pub fn trade(
    account_id: &str,
    security_id: &str,
    quantity: Decimal,
    price_per_unit: MinorUnits,
    fee: MinorUnits,
) -> TradeRequest {
    TradeRequest {
        account_id: Id::from(account_id),
        security_id: Id::from(security_id),
        quantity,
        price_per_unit,
        fee,
        date: day(2026, 3, 2),
        settlement_account_id: None,
        notes: None,
    }
}

/// An engine over in-memory collaborators, with the handles tests poke at.
pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub accounts: Arc<MemoryAccountBook>,
    pub prices: Arc<dyn PriceStore>,
    pub clock: Arc<ManualClock>,
    pub engine: Engine,
}

impl Harness {
    pub async fn new(accounts: Vec<Account>) -> Result<Self> {
        Self::with_config(accounts, EngineConfig::default()).await
    }

    pub async fn with_config(accounts: Vec<Account>, config: EngineConfig) -> Result<Self> {
        Self::with_prices(accounts, Arc::new(MemoryPriceStore::new()), config).await
    }

    pub async fn with_prices(
        accounts: Vec<Account>,
        prices: Arc<dyn PriceStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save_security(&security("vti", "VTI", AssetClass::Etf))
            .await?;
        storage
            .save_security(&security("btc", "BTC", AssetClass::Crypto))
            .await?;

        let accounts = Arc::new(MemoryAccountBook::with_accounts(accounts));
        let clock = Arc::new(ManualClock::new(t(2026, 3, 2, 15)));

        let engine = Engine::new(
            storage.clone(),
            prices.clone(),
            accounts.clone(),
            clock.clone(),
            Arc::new(UuidIdGenerator),
            config,
        );

        Ok(Self {
            storage,
            accounts,
            prices,
            clock,
            engine,
        })
    }

    pub async fn balance(&self, account_id: &str) -> Result<MinorUnits> {
        let account = self
            .accounts
            .get_account(&Id::from(account_id))
            .await?
            .ok_or_else(|| anyhow::anyhow!("no account {account_id}"))?;
        Ok(account.balance)
    }

    pub async fn set_price(&self, security_id: &str, amount: MinorUnits, at: DateTime<Utc>) -> Result<()> {
        self.prices
            .record_prices(&[price(security_id, amount, at)])
            .await?;
        Ok(())
    }
}
