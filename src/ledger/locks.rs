use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::models::HoldingKey;

/// Slots are dropped once the table grows past this and nobody holds them.
const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per holding. Operations on the same holding queue behind
/// each other; different holdings never contend.
#[derive(Default)]
pub struct HoldingLocks {
    slots: Mutex<HashMap<HoldingKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of one ledger operation.
pub struct HoldingGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl HoldingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &HoldingKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.len() > PRUNE_THRESHOLD {
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(key.clone()).or_default().clone()
    }

    pub async fn lock(&self, key: &HoldingKey) -> HoldingGuard {
        let guard = self.slot(key).lock_owned().await;
        HoldingGuard {
            _guards: vec![guard],
        }
    }

    /// Lock several holdings in key order, so two operations over the same
    /// pair in opposite directions cannot deadlock.
    pub async fn lock_all(&self, keys: &[HoldingKey]) -> HoldingGuard {
        let mut ordered: Vec<&HoldingKey> = keys.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.slot(key).lock_owned().await);
        }
        HoldingGuard { _guards: guards }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
