//! Account balance collaborator. Account CRUD lives outside the engine; the
//! engine reads accounts, sums balances for snapshots and asks for cash to
//! move when a trade settles.

mod book;
mod json_file;
mod memory;

pub use json_file::JsonFileAccountBook;
pub use memory::MemoryAccountBook;

use anyhow::Result;

use crate::models::{Account, AccountKind, Id};
use crate::money::MinorUnits;

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("insufficient balance in account {account_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        account_id: Id,
        requested: MinorUnits,
        available: MinorUnits,
    },

    #[error("account not found: {0}")]
    AccountNotFound(Id),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait AccountBalances: Send + Sync {
    async fn get_account(&self, account_id: &Id) -> Result<Option<Account>>;

    /// Live accounts owned by `user_id`.
    async fn list_accounts(&self, user_id: &Id) -> Result<Vec<Account>>;

    /// Withdraw from an asset account. Fails without changing anything when
    /// the balance would go negative.
    async fn debit(&self, account_id: &Id, amount: MinorUnits) -> Result<(), BalanceError>;

    async fn credit(&self, account_id: &Id, amount: MinorUnits) -> Result<(), BalanceError>;

    /// Sum of balances over live accounts of one kind.
    async fn sum_balances(&self, user_id: &Id, kind: AccountKind) -> Result<MinorUnits>;

    /// Users that own at least one live account, sorted.
    async fn distinct_users(&self) -> Result<Vec<Id>>;
}
