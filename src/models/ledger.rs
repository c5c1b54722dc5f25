use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Holding, Id};
use crate::money::MinorUnits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Buy,
    Sell,
    Dividend,
    Split,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DividendKind {
    /// Regular cash distribution.
    Cash,
    /// One-off cash distribution.
    Special,
    /// Paid in additional units (reinvestment / stock dividend).
    Stock,
}

impl DividendKind {
    pub fn is_cash_settled(self) -> bool {
        matches!(self, Self::Cash | Self::Special)
    }
}

impl std::str::FromStr for DividendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "special" => Ok(Self::Special),
            "stock" => Ok(Self::Stock),
            other => Err(format!("unknown dividend kind: {other}")),
        }
    }
}

/// One immutable accounting event against a holding.
///
/// Entries are never edited. `removed_at` is a tombstone for audit retention;
/// readers filter on it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Id,
    pub holding_id: Id,
    pub account_id: Id,
    pub security_id: Id,
    pub kind: EntryKind,
    pub date: NaiveDate,
    /// Signed change in units (negative for sells and outgoing transfers).
    pub quantity_delta: Decimal,
    pub price_per_unit: MinorUnits,
    pub total_amount: MinorUnits,
    pub fee: MinorUnits,
    pub realized_gain_loss: MinorUnits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_ratio: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividend_kind: Option<DividendKind>,
    /// Other side of a transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_account_id: Option<Id>,
    /// Cash account debited or credited, when cash moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_account_id: Option<Id>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }
}

/// An entry together with the holding state it produced. Storage commits
/// these as a unit so the two are never observed out of sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub holding: Holding,
    pub entry: LedgerEntry,
}
