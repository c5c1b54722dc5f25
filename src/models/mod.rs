mod account;
mod holding;
mod id;
mod id_generator;
mod ledger;
mod security;
mod snapshot;

pub use account::{Account, AccountKind};
pub use holding::{Holding, HoldingKey};
pub use id::{Id, IdError};
pub use id_generator::{FixedIdGenerator, IdGenerator, UuidIdGenerator};
pub use ledger::{DividendKind, EntryKind, LedgerEntry, LedgerRecord};
pub use security::{AssetClass, PriceObservation, Security};
pub use snapshot::PortfolioSnapshot;
