use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{AssetClass, Id, PortfolioSnapshot};
use crate::money::MinorUnits;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingValuation {
    pub holding_id: Id,
    pub account_id: Id,
    pub security_id: Id,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub quantity: Decimal,
    pub price: MinorUnits,
    pub price_recorded_at: DateTime<Utc>,
    pub market_value: MinorUnits,
    pub cost_basis: MinorUnits,
    pub unrealized_gain_loss: MinorUnits,
    pub realized_gain_loss: MinorUnits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpricedReason {
    NoPrice,
    UnknownSecurity,
}

/// A live holding left out of the totals because it could not be valued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpricedHolding {
    pub holding_id: Id,
    pub account_id: Id,
    pub security_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<AssetClass>,
    pub quantity: Decimal,
    pub cost_basis: MinorUnits,
    pub reason: UnpricedReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetClassSummary {
    pub value: MinorUnits,
    pub cost_basis: MinorUnits,
    pub count: usize,
}

/// Valuation of every live holding across a user's investment accounts.
///
/// `total_value` and `total_cost_basis` cover priced holdings only, so the
/// gain/loss is never skewed by a missing price. Unpriced positions are listed
/// separately along with their combined cost basis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub as_of: DateTime<Utc>,
    pub total_value: MinorUnits,
    pub total_cost_basis: MinorUnits,
    pub total_gain_loss: MinorUnits,
    /// Percentage, two decimal places; zero when there is no cost basis.
    pub gain_loss_pct: Decimal,
    /// Lifetime realized gain/loss, closed positions included.
    pub total_realized_gain_loss: MinorUnits,
    pub by_asset_class: BTreeMap<AssetClass, AssetClassSummary>,
    pub holdings: Vec<HoldingValuation>,
    pub unpriced: Vec<UnpricedHolding>,
    pub unpriced_cost_basis: MinorUnits,
}

impl PortfolioSummary {
    pub fn empty(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            total_value: 0,
            total_cost_basis: 0,
            total_gain_loss: 0,
            gain_loss_pct: Decimal::ZERO,
            total_realized_gain_loss: 0,
            by_asset_class: BTreeMap::new(),
            holdings: Vec::new(),
            unpriced: Vec::new(),
            unpriced_cost_basis: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "snapshot", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    Recorded(PortfolioSnapshot),
    /// A snapshot for this (user, time) already existed and was left alone.
    Existing(PortfolioSnapshot),
}

impl SnapshotOutcome {
    pub fn snapshot(&self) -> &PortfolioSnapshot {
        match self {
            Self::Recorded(s) | Self::Existing(s) => s,
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFailure {
    pub user_id: Id,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub recorded: usize,
    pub already_recorded: usize,
    pub failures: Vec<SnapshotFailure>,
    /// Users not confirmed when the deadline fired. Their snapshot may still
    /// have been written.
    pub cancelled: Vec<Id>,
}
