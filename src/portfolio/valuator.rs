use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::accounts::AccountBalances;
use crate::clock::Clock;
use crate::error::Result;
use crate::market_data::PriceStore;
use crate::models::{AccountKind, Holding, Id, PriceObservation, Security};
use crate::money;
use crate::storage::Storage;

use super::models::{HoldingValuation, PortfolioSummary, UnpricedHolding, UnpricedReason};

/// Read-only aggregation of holdings and prices. Not transactionally
/// consistent with in-flight ledger writes.
pub struct PortfolioValuator {
    storage: Arc<dyn Storage>,
    prices: Arc<dyn PriceStore>,
    accounts: Arc<dyn AccountBalances>,
    clock: Arc<dyn Clock>,
}

/// `gain / basis * 100`, two decimal places.
fn percentage(gain: i64, basis: i64) -> Decimal {
    if basis == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(gain) * Decimal::ONE_HUNDRED / Decimal::from(basis))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

fn add(total: money::MinorUnits, amount: money::MinorUnits) -> anyhow::Result<money::MinorUnits> {
    total.checked_add(amount).context("portfolio total overflow")
}

fn unpriced(holding: &Holding, security: Option<&Security>, reason: UnpricedReason) -> UnpricedHolding {
    UnpricedHolding {
        holding_id: holding.id.clone(),
        account_id: holding.account_id.clone(),
        security_id: holding.security_id.clone(),
        symbol: security.map(|s| s.symbol.clone()),
        asset_class: security.map(|s| s.asset_class),
        quantity: holding.quantity,
        cost_basis: holding.cost_basis,
        reason,
    }
}

impl PortfolioValuator {
    pub fn new(
        storage: Arc<dyn Storage>,
        prices: Arc<dyn PriceStore>,
        accounts: Arc<dyn AccountBalances>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            prices,
            accounts,
            clock,
        }
    }

    pub async fn compute_portfolio(&self, user_id: &Id) -> Result<PortfolioSummary> {
        self.compute_portfolio_as_of(user_id, self.clock.now()).await
    }

    pub async fn compute_portfolio_as_of(
        &self,
        user_id: &Id,
        as_of: DateTime<Utc>,
    ) -> Result<PortfolioSummary> {
        let account_ids: Vec<Id> = self
            .accounts
            .list_accounts(user_id)
            .await?
            .into_iter()
            .filter(|a| a.kind == AccountKind::Investment)
            .map(|a| a.id)
            .collect();

        let mut summary = PortfolioSummary::empty(as_of);
        if account_ids.is_empty() {
            return Ok(summary);
        }

        let holdings = self.storage.list_holdings(&account_ids).await?;
        let mut securities: HashMap<Id, Option<Security>> = HashMap::new();
        let mut prices: HashMap<Id, Option<PriceObservation>> = HashMap::new();

        for holding in &holdings {
            summary.total_realized_gain_loss =
                add(summary.total_realized_gain_loss, holding.realized_gain_loss)?;
            if holding.is_closed() {
                continue;
            }

            if !securities.contains_key(&holding.security_id) {
                let security = self.storage.get_security(&holding.security_id).await?;
                securities.insert(holding.security_id.clone(), security);
            }
            let Some(security) = securities.get(&holding.security_id).and_then(Option::as_ref)
            else {
                tracing::warn!(
                    holding_id = %holding.id,
                    security_id = %holding.security_id,
                    "Holding references an unknown security"
                );
                summary.unpriced_cost_basis = add(summary.unpriced_cost_basis, holding.cost_basis)?;
                summary
                    .unpriced
                    .push(unpriced(holding, None, UnpricedReason::UnknownSecurity));
                continue;
            };

            if !prices.contains_key(&holding.security_id) {
                let price = self
                    .prices
                    .latest_price(&holding.security_id, as_of)
                    .await
                    .with_context(|| format!("Failed to look up price for {}", security.symbol))?;
                prices.insert(holding.security_id.clone(), price);
            }
            let Some(price) = prices.get(&holding.security_id).and_then(Option::as_ref) else {
                tracing::debug!(security_id = %holding.security_id, symbol = %security.symbol, "No price recorded");
                summary.unpriced_cost_basis = add(summary.unpriced_cost_basis, holding.cost_basis)?;
                summary
                    .unpriced
                    .push(unpriced(holding, Some(security), UnpricedReason::NoPrice));
                continue;
            };

            let market_value = money::extend(holding.quantity, price.price)
                .with_context(|| format!("Market value overflow for holding {}", holding.id))?;
            let unrealized_gain_loss = market_value
                .checked_sub(holding.cost_basis)
                .context("unrealized gain/loss overflow")?;
            summary.total_value = add(summary.total_value, market_value)?;
            summary.total_cost_basis = add(summary.total_cost_basis, holding.cost_basis)?;

            let class = summary.by_asset_class.entry(security.asset_class).or_default();
            class.value = add(class.value, market_value)?;
            class.cost_basis = add(class.cost_basis, holding.cost_basis)?;
            class.count += 1;

            summary.holdings.push(HoldingValuation {
                holding_id: holding.id.clone(),
                account_id: holding.account_id.clone(),
                security_id: holding.security_id.clone(),
                symbol: security.symbol.clone(),
                asset_class: security.asset_class,
                quantity: holding.quantity,
                price: price.price,
                price_recorded_at: price.recorded_at,
                market_value,
                cost_basis: holding.cost_basis,
                unrealized_gain_loss,
                realized_gain_loss: holding.realized_gain_loss,
            });
        }

        summary.total_gain_loss = summary
            .total_value
            .checked_sub(summary.total_cost_basis)
            .context("portfolio gain/loss overflow")?;
        summary.gain_loss_pct = percentage(summary.total_gain_loss, summary.total_cost_basis);

        tracing::debug!(
            user_id = %user_id,
            holdings = summary.holdings.len(),
            unpriced = summary.unpriced.len(),
            total_value = summary.total_value,
            "Computed portfolio"
        );
        Ok(summary)
    }
}
