use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;
use crate::money::MinorUnits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Stock,
    Etf,
    Bond,
    Crypto,
    Reit,
}

impl std::str::FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" => Ok(Self::Stock),
            "etf" => Ok(Self::Etf),
            "bond" => Ok(Self::Bond),
            "crypto" => Ok(Self::Crypto),
            "reit" => Ok(Self::Reit),
            other => Err(format!("unknown asset class: {other}")),
        }
    }
}

/// A tradable instrument. Holdings refer to it by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub id: Id,
    pub symbol: String,
    pub name: String,
    pub asset_class: AssetClass,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
}

/// One recorded price for a security, pushed in by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub security_id: Id,
    pub price: MinorUnits,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}
