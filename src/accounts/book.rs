//! Balance rules shared by the account book implementations.

use std::collections::{BTreeSet, HashMap};

use crate::models::{Account, AccountKind, Id};
use crate::money::MinorUnits;

use super::BalanceError;

#[derive(Debug, Default)]
pub(super) struct AccountTable {
    accounts: HashMap<Id, Account>,
}

impl AccountTable {
    pub(super) fn from_accounts(accounts: Vec<Account>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    /// All accounts, tombstoned ones included, in id order.
    pub(super) fn all(&self) -> Vec<Account> {
        let mut out: Vec<Account> = self.accounts.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub(super) fn get(&self, id: &Id) -> Option<Account> {
        self.accounts.get(id).cloned()
    }

    pub(super) fn put(&mut self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub(super) fn live_for_user(&self, user_id: &Id) -> Vec<Account> {
        let mut out: Vec<Account> = self
            .accounts
            .values()
            .filter(|a| &a.user_id == user_id && a.is_live())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub(super) fn users(&self) -> Vec<Id> {
        self.accounts
            .values()
            .filter(|a| a.is_live())
            .map(|a| a.user_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub(super) fn sum(&self, user_id: &Id, kind: AccountKind) -> anyhow::Result<MinorUnits> {
        self.accounts
            .values()
            .filter(|a| &a.user_id == user_id && a.kind == kind && a.is_live())
            .try_fold(0i64, |acc, a| {
                acc.checked_add(a.balance)
                    .ok_or_else(|| anyhow::anyhow!("balance sum overflow for user {user_id}"))
            })
    }

    /// Balance after moving `amount` in or out of the account, without applying
    /// it.
    pub(super) fn preview(
        &self,
        account_id: &Id,
        amount: MinorUnits,
        outgoing: bool,
    ) -> Result<MinorUnits, BalanceError> {
        let account = self
            .accounts
            .get(account_id)
            .filter(|a| a.is_live())
            .ok_or_else(|| BalanceError::AccountNotFound(account_id.clone()))?;
        if amount < 0 {
            return Err(anyhow::anyhow!("negative settlement amount {amount}").into());
        }
        if account.kind.is_liability() {
            return Err(anyhow::anyhow!(
                "account {account_id} is a {:?} account and cannot settle trades",
                account.kind
            )
            .into());
        }

        if outgoing {
            if account.balance < amount {
                return Err(BalanceError::InsufficientBalance {
                    account_id: account_id.clone(),
                    requested: amount,
                    available: account.balance,
                });
            }
            Ok(account.balance - amount)
        } else {
            account
                .balance
                .checked_add(amount)
                .ok_or_else(|| anyhow::anyhow!("balance overflow on account {account_id}").into())
        }
    }

    pub(super) fn set_balance(&mut self, account_id: &Id, balance: MinorUnits) {
        if let Some(account) = self.accounts.get_mut(account_id) {
            account.balance = balance;
        }
    }
}
