use std::collections::VecDeque;
use std::sync::Mutex;

use super::Id;

/// Factory for entity identity. The engine asks for an id before it builds a
/// holding, ledger entry or snapshot, so identity assignment is an explicit
/// step rather than a side effect of persisting.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> Id;
}

/// Produces UUIDv7 ids, which sort by creation time.
#[derive(Debug, Clone, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn new_id(&self) -> Id {
        Id::new_v7()
    }
}

/// A deterministic generator that returns a pre-seeded sequence of IDs, then
/// falls back to UUIDv7 ids once the sequence runs out.
#[derive(Debug, Default)]
pub struct FixedIdGenerator {
    ids: Mutex<VecDeque<Id>>,
}

impl FixedIdGenerator {
    pub fn new(ids: impl IntoIterator<Item = Id>) -> Self {
        Self {
            ids: Mutex::new(ids.into_iter().collect()),
        }
    }

    /// `prefix-1`, `prefix-2`, ... up to `count`.
    pub fn sequence(prefix: &str, count: usize) -> Self {
        Self::new((1..=count).map(|n| Id::from_string(format!("{prefix}-{n}"))))
    }
}

impl IdGenerator for FixedIdGenerator {
    fn new_id(&self) -> Id {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(Id::new_v7)
    }
}
