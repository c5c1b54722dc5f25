//! Error taxonomy returned by the engine's public entry points.
//!
//! Storage and configuration code works with `anyhow` and attaches context;
//! those failures become [`EngineError::Internal`] at the engine boundary. The
//! internal chain is logged there and never rendered in the user-facing
//! message.
//!
//! A missing price is not an error: valuation reports the holding as unpriced
//! and carries on.

use rust_decimal::Decimal;

use crate::models::Id;
use crate::money::MinorUnits;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Insufficient shares: requested {requested}, held {held}")]
    InsufficientShares { requested: Decimal, held: Decimal },

    #[error("Insufficient balance in account {account_id}: requested {requested}")]
    InsufficientBalance {
        account_id: Id,
        requested: MinorUnits,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("An internal error occurred")]
    Internal(#[source] anyhow::Error),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for callers that render errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_INPUT",
            Self::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = format!("{err:#}"), "internal engine failure");
        Self::Internal(err)
    }
}
