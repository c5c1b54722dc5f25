use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Id, PriceObservation};

/// Read side of the price store plus the write side used by the ingestion
/// pipeline. The engine itself never fetches prices from providers.
#[async_trait::async_trait]
pub trait PriceStore: Send + Sync {
    /// Most recent observation with `recorded_at <= as_of`.
    async fn latest_price(
        &self,
        security_id: &Id,
        as_of: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>>;

    /// Store observations, ignoring any whose `(security_id, recorded_at)` is
    /// already present. Returns how many were newly stored.
    async fn record_prices(&self, prices: &[PriceObservation]) -> Result<usize>;
}

pub struct NullPriceStore;

#[async_trait::async_trait]
impl PriceStore for NullPriceStore {
    async fn latest_price(
        &self,
        _security_id: &Id,
        _as_of: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>> {
        Ok(None)
    }

    async fn record_prices(&self, _prices: &[PriceObservation]) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Default)]
pub struct MemoryPriceStore {
    prices: tokio::sync::Mutex<HashMap<Id, BTreeMap<DateTime<Utc>, PriceObservation>>>,
}

impl MemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PriceStore for MemoryPriceStore {
    async fn latest_price(
        &self,
        security_id: &Id,
        as_of: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>> {
        let prices = self.prices.lock().await;
        Ok(prices
            .get(security_id)
            .and_then(|series| series.range(..=as_of).next_back())
            .map(|(_, p)| p.clone()))
    }

    async fn record_prices(&self, prices: &[PriceObservation]) -> Result<usize> {
        if prices.is_empty() {
            return Ok(0);
        }
        let mut store = self.prices.lock().await;
        let mut stored = 0;
        for price in prices {
            let series = store.entry(price.security_id.clone()).or_default();
            if let Some(existing) = series.get(&price.recorded_at) {
                if existing.price != price.price {
                    tracing::warn!(
                        security_id = %price.security_id,
                        recorded_at = %price.recorded_at,
                        kept = existing.price,
                        ignored = price.price,
                        "Conflicting price for an existing timestamp"
                    );
                }
                continue;
            }
            series.insert(price.recorded_at, price.clone());
            stored += 1;
        }
        Ok(stored)
    }
}
