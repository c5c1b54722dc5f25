//! The engine facade: the only entry point other layers use to touch
//! holdings, the ledger, valuations and snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::AccountBalances;
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::ledger::{
    BuyRequest, DividendRequest, LedgerSettings, SellRequest, SplitRequest, TransactionProcessor,
    TransferRecords, TransferRequest,
};
use crate::market_data::PriceStore;
use crate::models::{
    Holding, Id, IdGenerator, LedgerEntry, LedgerRecord, PortfolioSnapshot, PriceObservation,
    Security,
};
use crate::pagination::{Page, PageRequest};
use crate::portfolio::{
    BatchResult, PortfolioSummary, PortfolioValuator, SnapshotEngine, SnapshotOutcome,
    SnapshotSettings,
};
use crate::storage::Storage;

/// Settings handed to the engine once at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ledger: LedgerSettings,
    pub snapshots: SnapshotSettings,
}

pub struct Engine {
    storage: Arc<dyn Storage>,
    prices: Arc<dyn PriceStore>,
    processor: TransactionProcessor,
    valuator: Arc<PortfolioValuator>,
    snapshots: SnapshotEngine,
}

impl Engine {
    pub fn new(
        storage: Arc<dyn Storage>,
        prices: Arc<dyn PriceStore>,
        accounts: Arc<dyn AccountBalances>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: EngineConfig,
    ) -> Self {
        let processor = TransactionProcessor::new(
            storage.clone(),
            accounts.clone(),
            clock.clone(),
            ids.clone(),
            config.ledger,
        );
        let valuator = Arc::new(PortfolioValuator::new(
            storage.clone(),
            prices.clone(),
            accounts.clone(),
            clock,
        ));
        let snapshots = SnapshotEngine::new(
            storage.clone(),
            accounts,
            valuator.clone(),
            ids,
            config.snapshots,
        );
        Self {
            storage,
            prices,
            processor,
            valuator,
            snapshots,
        }
    }

    pub async fn record_buy(&self, request: BuyRequest) -> Result<LedgerRecord> {
        self.processor.record_buy(request).await
    }

    pub async fn record_sell(&self, request: SellRequest) -> Result<LedgerRecord> {
        self.processor.record_sell(request).await
    }

    pub async fn record_dividend(&self, request: DividendRequest) -> Result<LedgerRecord> {
        self.processor.record_dividend(request).await
    }

    pub async fn record_split(&self, request: SplitRequest) -> Result<LedgerRecord> {
        self.processor.record_split(request).await
    }

    pub async fn record_transfer(&self, request: TransferRequest) -> Result<TransferRecords> {
        self.processor.record_transfer(request).await
    }

    pub async fn remove_entry(&self, entry_id: &Id) -> Result<LedgerEntry> {
        self.processor.remove_entry(entry_id).await
    }

    pub async fn ledger_history(
        &self,
        account_id: &Id,
        security_id: &Id,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>> {
        self.processor
            .ledger_history(account_id, security_id, page)
            .await
    }

    pub async fn holding(&self, account_id: &Id, security_id: &Id) -> Result<Holding> {
        self.processor.holding(account_id, security_id).await
    }

    pub async fn compute_portfolio(&self, user_id: &Id) -> Result<PortfolioSummary> {
        self.valuator.compute_portfolio(user_id).await
    }

    pub async fn snapshot_user(&self, user_id: &Id, as_of: DateTime<Utc>) -> Result<SnapshotOutcome> {
        self.snapshots.snapshot_user(user_id, as_of).await
    }

    pub async fn compute_snapshots(&self, as_of: DateTime<Utc>, users: &[Id]) -> BatchResult {
        self.snapshots.compute_snapshots(as_of, users).await
    }

    pub async fn snapshot_history(
        &self,
        user_id: &Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Page<PortfolioSnapshot>> {
        self.snapshots
            .snapshot_history(user_id, from, to, page)
            .await
    }

    /// Register a security. Identity fields never change, so re-adding an
    /// existing id is a conflict.
    pub async fn add_security(&self, security: Security) -> Result<Security> {
        if !Id::is_path_safe(security.id.as_str()) {
            return Err(EngineError::validation(format!(
                "invalid security id: {}",
                security.id
            )));
        }
        if security.symbol.trim().is_empty() {
            return Err(EngineError::validation("symbol must not be empty"));
        }
        if security.currency.trim().is_empty() {
            return Err(EngineError::validation("currency must not be empty"));
        }
        if self.storage.get_security(&security.id).await?.is_some() {
            return Err(EngineError::Conflict(format!(
                "security {} already exists",
                security.id
            )));
        }
        self.storage.save_security(&security).await?;
        tracing::info!(security_id = %security.id, symbol = %security.symbol, "Added security");
        Ok(security)
    }

    /// Ingestion write side. Returns how many observations were new.
    pub async fn record_prices(&self, prices: &[PriceObservation]) -> Result<usize> {
        for price in prices {
            if price.price < 0 {
                return Err(EngineError::validation(format!(
                    "price for {} must not be negative",
                    price.security_id
                )));
            }
            if self.storage.get_security(&price.security_id).await?.is_none() {
                return Err(EngineError::not_found("Security", &price.security_id));
            }
        }
        let stored = self.prices.record_prices(prices).await?;
        tracing::info!(received = prices.len(), stored, "Recorded prices");
        Ok(stored)
    }
}
