use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::sync::Mutex;

use crate::models::{Account, AccountKind, Id};
use crate::money::MinorUnits;

use super::book::AccountTable;
use super::{AccountBalances, BalanceError};

/// Accounts kept in a single `accounts.json` under the data directory.
///
/// The file is rewritten whole (temp file, then rename) on each change, and
/// only after the write succeeds does the in-memory table change.
pub struct JsonFileAccountBook {
    path: PathBuf,
    table: Mutex<AccountTable>,
}

impl JsonFileAccountBook {
    pub async fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let path = base_path.as_ref().join("accounts.json");
        let accounts: Vec<Account> = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path,
            table: Mutex::new(AccountTable::from_accounts(accounts)),
        })
    }

    pub async fn save_account(&self, account: Account) -> Result<()> {
        let mut table = self.table.lock().await;
        let mut accounts = table.all();
        accounts.retain(|a| a.id != account.id);
        accounts.push(account.clone());
        self.write(&accounts).await?;
        table.put(account);
        Ok(())
    }

    async fn write(&self, accounts: &[Account]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create directory")?;
        }
        let content =
            serde_json::to_string_pretty(accounts).context("Failed to serialize accounts")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    async fn move_cash(
        &self,
        account_id: &Id,
        amount: MinorUnits,
        outgoing: bool,
    ) -> Result<(), BalanceError> {
        let mut table = self.table.lock().await;
        let balance = table.preview(account_id, amount, outgoing)?;
        let mut accounts = table.all();
        for account in accounts.iter_mut().filter(|a| &a.id == account_id) {
            account.balance = balance;
        }
        self.write(&accounts).await?;
        table.set_balance(account_id, balance);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AccountBalances for JsonFileAccountBook {
    async fn get_account(&self, account_id: &Id) -> Result<Option<Account>> {
        Ok(self.table.lock().await.get(account_id))
    }

    async fn list_accounts(&self, user_id: &Id) -> Result<Vec<Account>> {
        Ok(self.table.lock().await.live_for_user(user_id))
    }

    async fn debit(&self, account_id: &Id, amount: MinorUnits) -> Result<(), BalanceError> {
        self.move_cash(account_id, amount, true).await
    }

    async fn credit(&self, account_id: &Id, amount: MinorUnits) -> Result<(), BalanceError> {
        self.move_cash(account_id, amount, false).await
    }

    async fn sum_balances(&self, user_id: &Id, kind: AccountKind) -> Result<MinorUnits> {
        self.table.lock().await.sum(user_id, kind)
    }

    async fn distinct_users(&self) -> Result<Vec<Id>> {
        Ok(self.table.lock().await.users())
    }
}
