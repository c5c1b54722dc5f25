//! In-memory ledger state shared by both storage backends.
//!
//! `MemoryStorage` keeps only this; `JsonFileStorage` replays its journal into
//! it on open and mutates it after each durable append.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{
    Holding, HoldingKey, Id, LedgerEntry, LedgerRecord, PortfolioSnapshot, Security,
};

use super::SnapshotInsert;

#[derive(Debug, Default)]
pub(super) struct LedgerState {
    holdings: HashMap<HoldingKey, Holding>,
    entries: HashMap<Id, Vec<LedgerEntry>>,
    /// entry id -> holding id
    entry_owner: HashMap<Id, Id>,
    securities: HashMap<Id, Security>,
    snapshots: HashMap<Id, BTreeMap<DateTime<Utc>, PortfolioSnapshot>>,
}

impl LedgerState {
    pub(super) fn holding(&self, account_id: &Id, security_id: &Id) -> Option<Holding> {
        self.holdings
            .get(&HoldingKey::new(account_id.clone(), security_id.clone()))
            .cloned()
    }

    pub(super) fn holdings_for(&self, account_ids: &[Id]) -> Vec<Holding> {
        let wanted: HashSet<&Id> = account_ids.iter().collect();
        let mut out: Vec<Holding> = self
            .holdings
            .values()
            .filter(|h| wanted.contains(&h.account_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        out
    }

    /// Reject a commit that would corrupt the state. Nothing is mutated.
    pub(super) fn check_commit(&self, records: &[LedgerRecord]) -> Result<()> {
        let mut batch_keys = HashSet::new();
        let mut batch_entries = HashSet::new();

        for record in records {
            let key = record.holding.key();
            if record.entry.holding_id != record.holding.id {
                anyhow::bail!(
                    "Entry {} references holding {} but was committed with holding {}",
                    record.entry.id,
                    record.entry.holding_id,
                    record.holding.id
                );
            }
            if !batch_keys.insert(key.clone()) {
                anyhow::bail!(
                    "Holding {}/{} appears twice in one commit",
                    key.account_id,
                    key.security_id
                );
            }
            if let Some(existing) = self.holdings.get(&key) {
                if existing.id != record.holding.id {
                    anyhow::bail!(
                        "Holding {}/{} already exists with id {}",
                        key.account_id,
                        key.security_id,
                        existing.id
                    );
                }
            }
            if self.entry_owner.contains_key(&record.entry.id)
                || !batch_entries.insert(record.entry.id.clone())
            {
                anyhow::bail!("Ledger entry {} already exists", record.entry.id);
            }
        }
        Ok(())
    }

    pub(super) fn apply_commit(&mut self, records: &[LedgerRecord]) {
        for record in records {
            self.holdings
                .insert(record.holding.key(), record.holding.clone());
            self.entry_owner
                .insert(record.entry.id.clone(), record.holding.id.clone());
            self.entries
                .entry(record.holding.id.clone())
                .or_default()
                .push(record.entry.clone());
        }
    }

    pub(super) fn entries(&self, holding_id: &Id, include_removed: bool) -> Vec<LedgerEntry> {
        let mut out: Vec<LedgerEntry> = self
            .entries
            .get(holding_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| include_removed || !e.is_removed())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.recorded_at.cmp(&a.recorded_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        out
    }

    pub(super) fn entry(&self, entry_id: &Id) -> Option<LedgerEntry> {
        let holding_id = self.entry_owner.get(entry_id)?;
        self.entries
            .get(holding_id)?
            .iter()
            .find(|e| &e.id == entry_id)
            .cloned()
    }

    /// True when the entry exists and is not yet tombstoned.
    pub(super) fn can_remove(&self, entry_id: &Id) -> bool {
        self.entry(entry_id).is_some_and(|e| !e.is_removed())
    }

    pub(super) fn apply_removal(&mut self, entry_id: &Id, removed_at: DateTime<Utc>) -> bool {
        let Some(holding_id) = self.entry_owner.get(entry_id) else {
            return false;
        };
        let Some(entry) = self
            .entries
            .get_mut(holding_id)
            .and_then(|entries| entries.iter_mut().find(|e| &e.id == entry_id))
        else {
            return false;
        };
        if entry.removed_at.is_some() {
            return false;
        }
        entry.removed_at = Some(removed_at);
        true
    }

    pub(super) fn security(&self, id: &Id) -> Option<Security> {
        self.securities.get(id).cloned()
    }

    pub(super) fn securities(&self) -> Vec<Security> {
        let mut out: Vec<Security> = self.securities.values().cloned().collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub(super) fn put_security(&mut self, security: Security) {
        self.securities.insert(security.id.clone(), security);
    }

    pub(super) fn existing_snapshot(&self, snapshot: &PortfolioSnapshot) -> Option<PortfolioSnapshot> {
        self.snapshot(&snapshot.user_id, snapshot.recorded_at)
    }

    pub(super) fn insert_snapshot(&mut self, snapshot: PortfolioSnapshot) -> SnapshotInsert {
        let by_time = self.snapshots.entry(snapshot.user_id.clone()).or_default();
        match by_time.get(&snapshot.recorded_at) {
            Some(existing) => SnapshotInsert::Conflict(existing.clone()),
            None => {
                by_time.insert(snapshot.recorded_at, snapshot);
                SnapshotInsert::Inserted
            }
        }
    }

    pub(super) fn snapshot(&self, user_id: &Id, recorded_at: DateTime<Utc>) -> Option<PortfolioSnapshot> {
        self.snapshots.get(user_id)?.get(&recorded_at).cloned()
    }

    pub(super) fn snapshots_between(
        &self,
        user_id: &Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<PortfolioSnapshot> {
        if from > to {
            return Vec::new();
        }
        self.snapshots
            .get(user_id)
            .map(|by_time| by_time.range(from..=to).rev().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default()
    }
}
