use anyhow::Result;
use tokio::sync::Mutex;

use crate::models::{Account, AccountKind, Id};
use crate::money::MinorUnits;

use super::book::AccountTable;
use super::{AccountBalances, BalanceError};

#[derive(Default)]
pub struct MemoryAccountBook {
    table: Mutex<AccountTable>,
}

impl MemoryAccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: Vec<Account>) -> Self {
        Self {
            table: Mutex::new(AccountTable::from_accounts(accounts)),
        }
    }

    /// Insert or replace an account.
    pub async fn save_account(&self, account: Account) {
        self.table.lock().await.put(account);
    }
}

#[async_trait::async_trait]
impl AccountBalances for MemoryAccountBook {
    async fn get_account(&self, account_id: &Id) -> Result<Option<Account>> {
        Ok(self.table.lock().await.get(account_id))
    }

    async fn list_accounts(&self, user_id: &Id) -> Result<Vec<Account>> {
        Ok(self.table.lock().await.live_for_user(user_id))
    }

    async fn debit(&self, account_id: &Id, amount: MinorUnits) -> Result<(), BalanceError> {
        let mut table = self.table.lock().await;
        let balance = table.preview(account_id, amount, true)?;
        table.set_balance(account_id, balance);
        Ok(())
    }

    async fn credit(&self, account_id: &Id, amount: MinorUnits) -> Result<(), BalanceError> {
        let mut table = self.table.lock().await;
        let balance = table.preview(account_id, amount, false)?;
        table.set_balance(account_id, balance);
        Ok(())
    }

    async fn sum_balances(&self, user_id: &Id, kind: AccountKind) -> Result<MinorUnits> {
        self.table.lock().await.sum(user_id, kind)
    }

    async fn distinct_users(&self) -> Result<Vec<Id>> {
        Ok(self.table.lock().await.users())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn book() -> MemoryAccountBook {
        let mut closed = Account::new(
            Id::from("old"),
            Id::from("u1"),
            "Old Checking",
            AccountKind::Cash,
        )
        .with_balance(9_999);
        closed.deleted_at = Some(Utc::now());

        MemoryAccountBook::with_accounts(vec![
            Account::new(Id::from("chk"), Id::from("u1"), "Checking", AccountKind::Cash)
                .with_balance(50_000),
            Account::new(Id::from("sav"), Id::from("u1"), "Savings", AccountKind::Cash)
                .with_balance(25_000),
            Account::new(Id::from("card"), Id::from("u1"), "Card", AccountKind::CreditCard)
                .with_balance(7_000),
            Account::new(Id::from("u2-chk"), Id::from("u2"), "Checking", AccountKind::Cash),
            closed,
        ])
    }

    #[tokio::test]
    async fn debit_never_overdraws() -> Result<()> {
        let book = book();
        let err = book.debit(&Id::from("chk"), 50_001).await.unwrap_err();
        assert!(matches!(
            err,
            BalanceError::InsufficientBalance {
                available: 50_000,
                ..
            }
        ));

        book.debit(&Id::from("chk"), 50_000).await?;
        let account = book.get_account(&Id::from("chk")).await?.unwrap();
        assert_eq!(account.balance, 0);
        Ok(())
    }

    #[tokio::test]
    async fn liabilities_and_deleted_accounts_do_not_settle() -> Result<()> {
        let book = book();
        assert!(matches!(
            book.credit(&Id::from("card"), 100).await,
            Err(BalanceError::Other(_))
        ));
        assert!(matches!(
            book.credit(&Id::from("old"), 100).await,
            Err(BalanceError::AccountNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn sums_only_live_accounts_of_a_kind() -> Result<()> {
        let book = book();
        assert_eq!(
            book.sum_balances(&Id::from("u1"), AccountKind::Cash).await?,
            75_000
        );
        assert_eq!(
            book.sum_balances(&Id::from("u1"), AccountKind::CreditCard)
                .await?,
            7_000
        );
        assert_eq!(
            book.distinct_users().await?,
            vec![Id::from("u1"), Id::from("u2")]
        );
        Ok(())
    }
}
