use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Id;
use crate::money::{self, MinorUnits};

/// Natural key of a holding: one security in one account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HoldingKey {
    pub account_id: Id,
    pub security_id: Id,
}

impl HoldingKey {
    pub fn new(account_id: Id, security_id: Id) -> Self {
        Self {
            account_id,
            security_id,
        }
    }
}

/// A position of one security in one account.
///
/// Invariants kept by the ledger: `quantity >= 0`, `cost_basis >= 0`, and
/// `cost_basis == 0` whenever `quantity == 0`. A holding sold down to zero
/// stays on record for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub id: Id,
    pub account_id: Id,
    pub security_id: Id,
    pub quantity: Decimal,
    /// Aggregate amount paid for the units currently held.
    pub cost_basis: MinorUnits,
    /// Cumulative realized gain/loss over the holding's lifetime.
    pub realized_gain_loss: MinorUnits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    /// An empty position, as it exists just before its first buy.
    pub fn open(id: Id, key: HoldingKey, now: DateTime<Utc>) -> Self {
        Self {
            id,
            account_id: key.account_id,
            security_id: key.security_id,
            quantity: Decimal::ZERO,
            cost_basis: 0,
            realized_gain_loss: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> HoldingKey {
        HoldingKey::new(self.account_id.clone(), self.security_id.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Weighted-average cost per unit in minor units, or `None` for a closed
    /// position.
    pub fn average_unit_cost(&self) -> Option<MinorUnits> {
        money::prorate(self.cost_basis, Decimal::ONE, self.quantity)
    }
}
