//! In-memory storage, used by tests and by embedders that persist elsewhere.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{Holding, Id, LedgerEntry, LedgerRecord, PortfolioSnapshot, Security};

use super::state::LedgerState;
use super::{SnapshotInsert, Storage};

/// All state sits behind one async mutex, so a commit is atomic with respect
/// to every reader.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<LedgerState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get_holding(&self, account_id: &Id, security_id: &Id) -> Result<Option<Holding>> {
        Ok(self.state.lock().await.holding(account_id, security_id))
    }

    async fn list_holdings(&self, account_ids: &[Id]) -> Result<Vec<Holding>> {
        Ok(self.state.lock().await.holdings_for(account_ids))
    }

    async fn commit(&self, records: &[LedgerRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.check_commit(records)?;
        state.apply_commit(records);
        Ok(())
    }

    async fn list_entries(&self, holding_id: &Id, include_removed: bool) -> Result<Vec<LedgerEntry>> {
        Ok(self.state.lock().await.entries(holding_id, include_removed))
    }

    async fn get_entry(&self, entry_id: &Id) -> Result<Option<LedgerEntry>> {
        Ok(self.state.lock().await.entry(entry_id))
    }

    async fn soft_remove_entry(&self, entry_id: &Id, removed_at: DateTime<Utc>) -> Result<bool> {
        Ok(self.state.lock().await.apply_removal(entry_id, removed_at))
    }

    async fn get_security(&self, id: &Id) -> Result<Option<Security>> {
        Ok(self.state.lock().await.security(id))
    }

    async fn list_securities(&self) -> Result<Vec<Security>> {
        Ok(self.state.lock().await.securities())
    }

    async fn save_security(&self, security: &Security) -> Result<()> {
        self.state.lock().await.put_security(security.clone());
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<SnapshotInsert> {
        Ok(self.state.lock().await.insert_snapshot(snapshot.clone()))
    }

    async fn get_snapshot(
        &self,
        user_id: &Id,
        recorded_at: DateTime<Utc>,
    ) -> Result<Option<PortfolioSnapshot>> {
        Ok(self.state.lock().await.snapshot(user_id, recorded_at))
    }

    async fn list_snapshots(
        &self,
        user_id: &Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PortfolioSnapshot>> {
        Ok(self.state.lock().await.snapshots_between(user_id, from, to))
    }
}
