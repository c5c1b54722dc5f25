use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;
use crate::money::MinorUnits;

/// Immutable point-in-time net worth for a user, unique per
/// `(user_id, recorded_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub id: Id,
    pub user_id: Id,
    pub recorded_at: DateTime<Utc>,
    pub total_net_worth: MinorUnits,
    pub cash_balance: MinorUnits,
    pub investment_value: MinorUnits,
    pub debt_balance: MinorUnits,
}
