use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;
use crate::money::MinorUnits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Cash,
    Investment,
    Debt,
    CreditCard,
}

impl AccountKind {
    /// Debt-like accounts hold an owed amount rather than an asset.
    pub fn is_liability(self) -> bool {
        matches!(self, Self::Debt | Self::CreditCard)
    }
}

impl std::str::FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cash" => Ok(Self::Cash),
            "investment" => Ok(Self::Investment),
            "debt" => Ok(Self::Debt),
            "credit_card" => Ok(Self::CreditCard),
            other => Err(format!("unknown account kind: {other}")),
        }
    }
}

/// A user's financial account as seen by the engine. Owned by the account
/// collaborator; the engine reads it and asks for cash movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub kind: AccountKind,
    /// For liabilities this is the amount owed.
    pub balance: MinorUnits,
    pub currency: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: Id, user_id: Id, name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            id,
            user_id,
            name: name.into(),
            kind,
            balance: 0,
            currency: "USD".to_string(),
            active: true,
            deleted_at: None,
        }
    }

    pub fn with_balance(mut self, balance: MinorUnits) -> Self {
        self.balance = balance;
        self
    }

    /// Active and not tombstoned.
    pub fn is_live(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}
