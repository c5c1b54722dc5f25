use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::accounts::AccountBalances;
use crate::duration::{deserialize_duration, serialize_duration};
use crate::error::Result;
use crate::models::{AccountKind, Id, IdGenerator, PortfolioSnapshot};
use crate::money::MinorUnits;
use crate::pagination::{Page, PageRequest};
use crate::storage::{SnapshotInsert, Storage};

use super::models::{BatchResult, SnapshotFailure, SnapshotOutcome};
use super::valuator::PortfolioValuator;

pub const DEFAULT_SNAPSHOT_CONCURRENCY: usize = 4;
pub const DEFAULT_SNAPSHOT_DEADLINE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Users processed at once.
    pub concurrency: usize,
    /// Budget for a whole batch.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub deadline: Duration,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_SNAPSHOT_CONCURRENCY,
            deadline: DEFAULT_SNAPSHOT_DEADLINE,
        }
    }
}

fn tally(result: &mut BatchResult, user_id: Id, outcome: Result<SnapshotOutcome>) {
    match outcome {
        Ok(SnapshotOutcome::Recorded(_)) => result.recorded += 1,
        Ok(SnapshotOutcome::Existing(_)) => result.already_recorded += 1,
        Err(err) => {
            tracing::warn!(user_id = %user_id, error = %err, "Snapshot failed");
            result.failures.push(SnapshotFailure {
                user_id,
                reason: err.to_string(),
            });
        }
    }
}

/// Writes immutable net-worth snapshots, one per (user, time).
pub struct SnapshotEngine {
    storage: Arc<dyn Storage>,
    accounts: Arc<dyn AccountBalances>,
    valuator: Arc<PortfolioValuator>,
    ids: Arc<dyn IdGenerator>,
    settings: SnapshotSettings,
}

impl SnapshotEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        accounts: Arc<dyn AccountBalances>,
        valuator: Arc<PortfolioValuator>,
        ids: Arc<dyn IdGenerator>,
        settings: SnapshotSettings,
    ) -> Self {
        Self {
            storage,
            accounts,
            valuator,
            ids,
            settings,
        }
    }

    async fn sum_kinds(&self, user_id: &Id, kinds: &[AccountKind]) -> anyhow::Result<MinorUnits> {
        let mut total: MinorUnits = 0;
        for kind in kinds {
            let sum = self.accounts.sum_balances(user_id, *kind).await?;
            total = total
                .checked_add(sum)
                .with_context(|| format!("balance overflow for user {user_id}"))?;
        }
        Ok(total)
    }

    /// Snapshot one user at `as_of`. An existing snapshot for the same pair is
    /// returned untouched.
    pub async fn snapshot_user(&self, user_id: &Id, as_of: DateTime<Utc>) -> Result<SnapshotOutcome> {
        if let Some(existing) = self.storage.get_snapshot(user_id, as_of).await? {
            return Ok(SnapshotOutcome::Existing(existing));
        }

        let cash_balance = self.sum_kinds(user_id, &[AccountKind::Cash]).await?;
        let debt_balance = self
            .sum_kinds(user_id, &[AccountKind::Debt, AccountKind::CreditCard])
            .await?;
        let investment_value = self
            .valuator
            .compute_portfolio_as_of(user_id, as_of)
            .await?
            .total_value;

        let total_net_worth = cash_balance
            .checked_add(investment_value)
            .and_then(|v| v.checked_sub(debt_balance))
            .with_context(|| format!("net worth overflow for user {user_id}"))?;

        let snapshot = PortfolioSnapshot {
            id: self.ids.new_id(),
            user_id: user_id.clone(),
            recorded_at: as_of,
            total_net_worth,
            cash_balance,
            investment_value,
            debt_balance,
        };

        match self.storage.insert_snapshot(&snapshot).await? {
            SnapshotInsert::Inserted => {
                tracing::info!(
                    user_id = %user_id,
                    recorded_at = %as_of,
                    total_net_worth,
                    "Recorded portfolio snapshot"
                );
                Ok(SnapshotOutcome::Recorded(snapshot))
            }
            SnapshotInsert::Conflict(existing) => Ok(SnapshotOutcome::Existing(existing)),
        }
    }

    /// Snapshot many users with bounded parallelism. One user's failure never
    /// stops the others. Outcomes already complete when the deadline fires are
    /// still counted. Users cut off by it are reported as cancelled; their
    /// snapshot may or may not have been written, and a re-run at the same
    /// `as_of` reports it as already recorded if it was.
    pub async fn compute_snapshots(&self, as_of: DateTime<Utc>, users: &[Id]) -> BatchResult {
        let mut pending: BTreeSet<Id> = users.iter().cloned().collect();
        let mut result = BatchResult::default();

        let mut outcomes = futures::stream::iter(pending.clone())
            .map(move |user_id| async move {
                let outcome = self.snapshot_user(&user_id, as_of).await;
                (user_id, outcome)
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        let deadline = tokio::time::sleep(self.settings.deadline);
        tokio::pin!(deadline);
        let mut timed_out = false;

        loop {
            tokio::select! {
                next = outcomes.next() => {
                    let Some((user_id, outcome)) = next else {
                        break;
                    };
                    pending.remove(&user_id);
                    tally(&mut result, user_id, outcome);
                }
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            while let Some(Some((user_id, outcome))) = outcomes.next().now_or_never() {
                pending.remove(&user_id);
                tally(&mut result, user_id, outcome);
            }
            tracing::warn!(
                pending = pending.len(),
                deadline_secs = self.settings.deadline.as_secs(),
                "Snapshot batch deadline reached"
            );
        }

        result.cancelled = pending.into_iter().collect();
        tracing::info!(
            recorded_at = %as_of,
            recorded = result.recorded,
            already_recorded = result.already_recorded,
            failed = result.failures.len(),
            cancelled = result.cancelled.len(),
            "Snapshot batch finished"
        );
        result
    }

    /// Snapshots for a user between two instants, newest first.
    pub async fn snapshot_history(
        &self,
        user_id: &Id,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Page<PortfolioSnapshot>> {
        let page = page.normalized()?;
        let snapshots = self.storage.list_snapshots(user_id, from, to).await?;
        Page::slice(snapshots, page)
    }
}
