mod json_file;
mod lookup;
mod memory;
mod state;

pub use json_file::JsonFileStorage;
pub use lookup::find_security;
pub use memory::MemoryStorage;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Holding, Id, LedgerEntry, LedgerRecord, PortfolioSnapshot, Security};

/// Result of trying to record a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotInsert {
    Inserted,
    /// A snapshot for the same `(user_id, recorded_at)` already exists; it is
    /// returned untouched.
    Conflict(PortfolioSnapshot),
}

/// Persistence for holdings, the ledger, the security registry and net-worth
/// snapshots.
///
/// Only the transaction processor writes holdings and ledger entries, and it
/// always does so through [`Storage::commit`].
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Holdings
    async fn get_holding(&self, account_id: &Id, security_id: &Id) -> Result<Option<Holding>>;
    async fn list_holdings(&self, account_ids: &[Id]) -> Result<Vec<Holding>>;

    /// Upsert every record's holding and append its entry as one atomic unit.
    async fn commit(&self, records: &[LedgerRecord]) -> Result<()>;

    // Ledger
    /// Entries for a holding, newest event first.
    async fn list_entries(&self, holding_id: &Id, include_removed: bool) -> Result<Vec<LedgerEntry>>;
    async fn get_entry(&self, entry_id: &Id) -> Result<Option<LedgerEntry>>;
    /// Tombstone an entry. Returns false if it does not exist or was already
    /// removed.
    async fn soft_remove_entry(&self, entry_id: &Id, removed_at: DateTime<Utc>) -> Result<bool>;

    // Securities
    async fn get_security(&self, id: &Id) -> Result<Option<Security>>;
    async fn list_securities(&self) -> Result<Vec<Security>>;
    async fn save_security(&self, security: &Security) -> Result<()>;

    // Snapshots
    async fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<SnapshotInsert>;
    async fn get_snapshot(
        &self,
        user_id: &Id,
        recorded_at: DateTime<Utc>,
    ) -> Result<Option<PortfolioSnapshot>>;
    /// Snapshots with `from <= recorded_at <= to`, newest first.
    async fn list_snapshots(
        &self,
        user_id: &Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>>;
}
