//! Read side: portfolio valuation and net-worth snapshots.

mod models;
mod snapshots;
mod valuator;

pub use models::{
    AssetClassSummary, BatchResult, HoldingValuation, PortfolioSummary, SnapshotFailure,
    SnapshotOutcome, UnpricedHolding, UnpricedReason,
};
pub use snapshots::{
    SnapshotEngine, SnapshotSettings, DEFAULT_SNAPSHOT_CONCURRENCY, DEFAULT_SNAPSHOT_DEADLINE,
};
pub use valuator::PortfolioValuator;
