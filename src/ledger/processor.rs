use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::accounts::{AccountBalances, BalanceError};
use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::models::{
    Account, AccountKind, DividendKind, EntryKind, Holding, HoldingKey, Id, IdGenerator,
    LedgerEntry, LedgerRecord,
};
use crate::money::{self, MinorUnits, DEFAULT_QUANTITY_SCALE};
use crate::pagination::{Page, PageRequest};
use crate::storage::Storage;

use super::cost_basis::{self, Event, Position};
use super::locks::HoldingLocks;

/// Cost assigned to units received as a stock dividend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockDividendCost {
    /// The declared value is added to cost basis, as for a buy.
    #[default]
    DeclaredValue,
    /// New units carry no basis; the declared value is kept on the entry.
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub quantity_scale: u32,
    pub stock_dividend_cost: StockDividendCost,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            quantity_scale: DEFAULT_QUANTITY_SCALE,
            stock_dividend_cost: StockDividendCost::default(),
        }
    }
}

/// A buy or a sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub account_id: Id,
    pub security_id: Id,
    pub quantity: Decimal,
    pub price_per_unit: MinorUnits,
    #[serde(default)]
    pub fee: MinorUnits,
    pub date: NaiveDate,
    /// Defaults to the investment account itself.
    #[serde(default)]
    pub settlement_account_id: Option<Id>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub type BuyRequest = TradeRequest;
pub type SellRequest = TradeRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividendRequest {
    pub account_id: Id,
    pub security_id: Id,
    pub kind: DividendKind,
    /// Cash paid, or the declared value of the units for a stock dividend.
    pub total_amount: MinorUnits,
    /// Units received; stock dividends only.
    #[serde(default)]
    pub quantity: Option<Decimal>,
    pub date: NaiveDate,
    #[serde(default)]
    pub settlement_account_id: Option<Id>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub account_id: Id,
    pub security_id: Id,
    pub ratio: Decimal,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: Id,
    pub to_account_id: Id,
    pub security_id: Id,
    pub quantity: Decimal,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Both sides of a transfer, committed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecords {
    pub outgoing: LedgerRecord,
    pub incoming: LedgerRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Debit,
    Credit,
}

#[derive(Debug, Clone)]
struct CashMovement {
    account_id: Id,
    direction: Direction,
    amount: MinorUnits,
}

impl CashMovement {
    fn debit(account_id: Id, amount: MinorUnits) -> Self {
        Self {
            account_id,
            direction: Direction::Debit,
            amount,
        }
    }

    fn credit(account_id: Id, amount: MinorUnits) -> Self {
        Self {
            account_id,
            direction: Direction::Credit,
            amount,
        }
    }

    /// Net proceeds can go negative when the fee exceeds the gross amount.
    fn net(account_id: Id, amount: MinorUnits) -> Self {
        if amount >= 0 {
            Self::credit(account_id, amount)
        } else {
            Self::debit(account_id, -amount)
        }
    }

    fn reversed(&self) -> Self {
        Self {
            account_id: self.account_id.clone(),
            direction: match self.direction {
                Direction::Debit => Direction::Credit,
                Direction::Credit => Direction::Debit,
            },
            amount: self.amount,
        }
    }
}

fn balance_error(err: BalanceError) -> EngineError {
    match err {
        BalanceError::InsufficientBalance {
            account_id,
            requested,
            ..
        } => EngineError::InsufficientBalance {
            account_id,
            requested,
        },
        BalanceError::AccountNotFound(id) => EngineError::not_found("Account", id),
        BalanceError::Other(err) => err.into(),
    }
}

fn overflow() -> EngineError {
    EngineError::validation("amount exceeds the representable range")
}

fn check_non_negative(field: &str, value: MinorUnits) -> Result<()> {
    if value < 0 {
        return Err(EngineError::validation(format!(
            "{field} must not be negative, got {value}"
        )));
    }
    Ok(())
}

fn holding_not_found(key: &HoldingKey) -> EngineError {
    EngineError::not_found(
        "Holding",
        format!("{}/{}", key.account_id, key.security_id),
    )
}

fn log_recorded(record: &LedgerRecord) {
    tracing::info!(
        holding_id = %record.holding.id,
        entry_id = %record.entry.id,
        account_id = %record.holding.account_id,
        security_id = %record.holding.security_id,
        kind = ?record.entry.kind,
        quantity = %record.entry.quantity_delta,
        amount = record.entry.total_amount,
        "Recorded ledger entry"
    );
}

fn log_rejection(kind: EntryKind, err: &EngineError) {
    // Internal errors are logged where they are converted.
    if !matches!(err, EngineError::Internal(_)) {
        tracing::debug!(kind = ?kind, code = err.code(), error = %err, "Rejected ledger operation");
    }
}

/// The only writer of holdings and the ledger.
///
/// Each operation validates everything it can before touching state, takes
/// the holding's lock, computes the new position, moves cash, and commits
/// the holding and its entry together. If the commit fails the cash
/// movement is reversed.
pub struct TransactionProcessor {
    storage: Arc<dyn Storage>,
    accounts: Arc<dyn AccountBalances>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: LedgerSettings,
    locks: HoldingLocks,
}

impl TransactionProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        accounts: Arc<dyn AccountBalances>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            storage,
            accounts,
            clock,
            ids,
            settings,
            locks: HoldingLocks::new(),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub async fn record_buy(&self, request: BuyRequest) -> Result<LedgerRecord> {
        let result = self.buy(request).await;
        match &result {
            Ok(record) => log_recorded(record),
            Err(err) => log_rejection(EntryKind::Buy, err),
        }
        result
    }

    pub async fn record_sell(&self, request: SellRequest) -> Result<LedgerRecord> {
        let result = self.sell(request).await;
        match &result {
            Ok(record) => log_recorded(record),
            Err(err) => log_rejection(EntryKind::Sell, err),
        }
        result
    }

    pub async fn record_dividend(&self, request: DividendRequest) -> Result<LedgerRecord> {
        let result = self.dividend(request).await;
        match &result {
            Ok(record) => log_recorded(record),
            Err(err) => log_rejection(EntryKind::Dividend, err),
        }
        result
    }

    pub async fn record_split(&self, request: SplitRequest) -> Result<LedgerRecord> {
        let result = self.split(request).await;
        match &result {
            Ok(record) => log_recorded(record),
            Err(err) => log_rejection(EntryKind::Split, err),
        }
        result
    }

    pub async fn record_transfer(&self, request: TransferRequest) -> Result<TransferRecords> {
        let result = self.transfer(request).await;
        match &result {
            Ok(records) => {
                log_recorded(&records.outgoing);
                log_recorded(&records.incoming);
            }
            Err(err) => log_rejection(EntryKind::Transfer, err),
        }
        result
    }

    /// Tombstone an entry. The holding is left as is; removal is for audit
    /// retention, not a reversal.
    pub async fn remove_entry(&self, entry_id: &Id) -> Result<LedgerEntry> {
        let mut entry = self
            .storage
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Ledger entry", entry_id))?;
        let removed_at = self.clock.now();
        if entry.is_removed() || !self.storage.soft_remove_entry(entry_id, removed_at).await? {
            return Err(EngineError::Conflict(format!(
                "ledger entry {entry_id} is already removed"
            )));
        }
        entry.removed_at = Some(removed_at);
        tracing::info!(entry_id = %entry_id, holding_id = %entry.holding_id, "Removed ledger entry");
        Ok(entry)
    }

    pub async fn holding(&self, account_id: &Id, security_id: &Id) -> Result<Holding> {
        let key = HoldingKey::new(account_id.clone(), security_id.clone());
        self.storage
            .get_holding(account_id, security_id)
            .await?
            .ok_or_else(|| holding_not_found(&key))
    }

    /// Live entries for one holding, newest first.
    pub async fn ledger_history(
        &self,
        account_id: &Id,
        security_id: &Id,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>> {
        let page = page.normalized()?;
        let holding = self.holding(account_id, security_id).await?;
        let entries = self.storage.list_entries(&holding.id, false).await?;
        Page::slice(entries, page)
    }

    async fn buy(&self, req: BuyRequest) -> Result<LedgerRecord> {
        self.check_quantity("quantity", req.quantity)?;
        check_non_negative("price_per_unit", req.price_per_unit)?;
        check_non_negative("fee", req.fee)?;
        let account = self.investment_account(&req.account_id).await?;
        self.require_security(&req.security_id).await?;
        let settlement = self
            .settlement_account(&account, req.settlement_account_id.as_ref())
            .await?;

        let key = HoldingKey::new(req.account_id.clone(), req.security_id.clone());
        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();

        let existing = self
            .storage
            .get_holding(&key.account_id, &key.security_id)
            .await?;
        let mut holding = match existing {
            Some(holding) => holding,
            None => Holding::open(self.ids.new_id(), key, now),
        };
        let applied = cost_basis::apply(
            &Position::of(&holding),
            &Event::Buy {
                quantity: req.quantity,
                price_per_unit: req.price_per_unit,
                fee: req.fee,
            },
            self.settings.quantity_scale,
        )?;
        let total = applied
            .gross_amount
            .checked_add(req.fee)
            .ok_or_else(overflow)?;
        applied.position.write_to(&mut holding);
        holding.updated_at = now;

        let mut entry = self.new_entry(&holding, EntryKind::Buy, req.date, req.notes);
        entry.quantity_delta = req.quantity;
        entry.price_per_unit = req.price_per_unit;
        entry.total_amount = total;
        entry.fee = req.fee;
        entry.settlement_account_id = Some(settlement.clone());

        let record = LedgerRecord { holding, entry };
        let movement = CashMovement::debit(settlement, total);
        self.settle_and_commit(std::slice::from_ref(&record), Some(&movement))
            .await?;
        Ok(record)
    }

    async fn sell(&self, req: SellRequest) -> Result<LedgerRecord> {
        self.check_quantity("quantity", req.quantity)?;
        check_non_negative("price_per_unit", req.price_per_unit)?;
        check_non_negative("fee", req.fee)?;
        let account = self.investment_account(&req.account_id).await?;
        self.require_security(&req.security_id).await?;
        let settlement = self
            .settlement_account(&account, req.settlement_account_id.as_ref())
            .await?;

        let key = HoldingKey::new(req.account_id.clone(), req.security_id.clone());
        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();

        let mut holding = self.existing_holding(&key).await?;
        let applied = cost_basis::apply(
            &Position::of(&holding),
            &Event::Sell {
                quantity: req.quantity,
                price_per_unit: req.price_per_unit,
                fee: req.fee,
            },
            self.settings.quantity_scale,
        )?;
        let net = applied
            .gross_amount
            .checked_sub(req.fee)
            .ok_or_else(overflow)?;
        applied.position.write_to(&mut holding);
        holding.updated_at = now;

        let mut entry = self.new_entry(&holding, EntryKind::Sell, req.date, req.notes);
        entry.quantity_delta = -req.quantity;
        entry.price_per_unit = req.price_per_unit;
        entry.total_amount = net;
        entry.fee = req.fee;
        entry.realized_gain_loss = applied.realized_gain_loss;
        entry.settlement_account_id = Some(settlement.clone());

        let record = LedgerRecord { holding, entry };
        let movement = CashMovement::net(settlement, net);
        self.settle_and_commit(std::slice::from_ref(&record), Some(&movement))
            .await?;
        Ok(record)
    }

    async fn dividend(&self, req: DividendRequest) -> Result<LedgerRecord> {
        check_non_negative("total_amount", req.total_amount)?;
        let units = if req.kind.is_cash_settled() {
            if req.quantity.is_some_and(|q| !q.is_zero()) {
                return Err(EngineError::validation(
                    "quantity only applies to stock dividends",
                ));
            }
            if req.total_amount == 0 {
                return Err(EngineError::validation("total_amount must be positive"));
            }
            None
        } else {
            let quantity = req.quantity.ok_or_else(|| {
                EngineError::validation("stock dividends require a quantity")
            })?;
            self.check_quantity("quantity", quantity)?;
            if req.settlement_account_id.is_some() {
                return Err(EngineError::validation(
                    "stock dividends do not settle to a cash account",
                ));
            }
            Some(quantity)
        };

        let account = self.investment_account(&req.account_id).await?;
        self.require_security(&req.security_id).await?;
        let settlement = match units {
            None => Some(
                self.settlement_account(&account, req.settlement_account_id.as_ref())
                    .await?,
            ),
            Some(_) => None,
        };

        let key = HoldingKey::new(req.account_id.clone(), req.security_id.clone());
        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();

        let mut holding = self.existing_holding(&key).await?;
        let mut price_per_unit = 0;
        if let Some(quantity) = units {
            let added_cost = match self.settings.stock_dividend_cost {
                StockDividendCost::Zero => 0,
                StockDividendCost::DeclaredValue => {
                    price_per_unit = money::prorate(req.total_amount, Decimal::ONE, quantity)
                        .ok_or_else(overflow)?;
                    req.total_amount
                }
            };
            let applied = cost_basis::apply(
                &Position::of(&holding),
                &Event::UnitDividend {
                    quantity,
                    added_cost,
                },
                self.settings.quantity_scale,
            )?;
            applied.position.write_to(&mut holding);
        }
        holding.updated_at = now;

        let mut entry = self.new_entry(&holding, EntryKind::Dividend, req.date, req.notes);
        entry.quantity_delta = units.unwrap_or(Decimal::ZERO);
        entry.price_per_unit = price_per_unit;
        entry.total_amount = req.total_amount;
        entry.dividend_kind = Some(req.kind);
        entry.settlement_account_id = settlement.clone();

        let record = LedgerRecord { holding, entry };
        let movement = settlement.map(|account_id| CashMovement::credit(account_id, req.total_amount));
        self.settle_and_commit(std::slice::from_ref(&record), movement.as_ref())
            .await?;
        Ok(record)
    }

    async fn split(&self, req: SplitRequest) -> Result<LedgerRecord> {
        if req.ratio <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "split ratio must be positive, got {}",
                req.ratio
            )));
        }
        self.investment_account(&req.account_id).await?;
        self.require_security(&req.security_id).await?;

        let key = HoldingKey::new(req.account_id.clone(), req.security_id.clone());
        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();

        let mut holding = self.existing_holding(&key).await?;
        let before = holding.quantity;
        let applied = cost_basis::apply(
            &Position::of(&holding),
            &Event::Split { ratio: req.ratio },
            self.settings.quantity_scale,
        )?;
        applied.position.write_to(&mut holding);
        holding.updated_at = now;

        let mut entry = self.new_entry(&holding, EntryKind::Split, req.date, req.notes);
        entry.quantity_delta = holding.quantity - before;
        entry.split_ratio = Some(req.ratio);

        let record = LedgerRecord { holding, entry };
        self.settle_and_commit(std::slice::from_ref(&record), None)
            .await?;
        Ok(record)
    }

    async fn transfer(&self, req: TransferRequest) -> Result<TransferRecords> {
        self.check_quantity("quantity", req.quantity)?;
        if req.from_account_id == req.to_account_id {
            return Err(EngineError::validation(
                "cannot transfer a holding to the same account",
            ));
        }
        let from = self.investment_account(&req.from_account_id).await?;
        let to = self.investment_account(&req.to_account_id).await?;
        if from.user_id != to.user_id {
            return Err(EngineError::validation(
                "transfers must stay within one user's accounts",
            ));
        }
        self.require_security(&req.security_id).await?;

        let from_key = HoldingKey::new(from.id.clone(), req.security_id.clone());
        let to_key = HoldingKey::new(to.id.clone(), req.security_id.clone());
        let _guard = self
            .locks
            .lock_all(&[from_key.clone(), to_key.clone()])
            .await;
        let now = self.clock.now();

        let mut source = self.existing_holding(&from_key).await?;
        let outgoing = cost_basis::apply(
            &Position::of(&source),
            &Event::TransferOut {
                quantity: req.quantity,
            },
            self.settings.quantity_scale,
        )?;
        let existing = self
            .storage
            .get_holding(&to_key.account_id, &to_key.security_id)
            .await?;
        let mut target = match existing {
            Some(holding) => holding,
            None => Holding::open(self.ids.new_id(), to_key, now),
        };
        let incoming = cost_basis::apply(
            &Position::of(&target),
            &Event::TransferIn {
                quantity: req.quantity,
                cost_basis: outgoing.cost_removed,
            },
            self.settings.quantity_scale,
        )?;

        outgoing.position.write_to(&mut source);
        source.updated_at = now;
        incoming.position.write_to(&mut target);
        target.updated_at = now;

        let mut out_entry =
            self.new_entry(&source, EntryKind::Transfer, req.date, req.notes.clone());
        out_entry.quantity_delta = -req.quantity;
        out_entry.total_amount = outgoing.cost_removed;
        out_entry.counterparty_account_id = Some(to.id.clone());

        let mut in_entry = self.new_entry(&target, EntryKind::Transfer, req.date, req.notes);
        in_entry.quantity_delta = req.quantity;
        in_entry.total_amount = outgoing.cost_removed;
        in_entry.counterparty_account_id = Some(from.id.clone());

        let records = TransferRecords {
            outgoing: LedgerRecord {
                holding: source,
                entry: out_entry,
            },
            incoming: LedgerRecord {
                holding: target,
                entry: in_entry,
            },
        };
        self.settle_and_commit(
            &[records.outgoing.clone(), records.incoming.clone()],
            None,
        )
        .await?;
        Ok(records)
    }

    fn check_quantity(&self, field: &str, quantity: Decimal) -> Result<()> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "{field} must be positive, got {quantity}"
            )));
        }
        if !money::fits_scale(quantity, self.settings.quantity_scale) {
            return Err(EngineError::validation(format!(
                "{field} has more than {} decimal places",
                self.settings.quantity_scale
            )));
        }
        Ok(())
    }

    async fn investment_account(&self, account_id: &Id) -> Result<Account> {
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .filter(Account::is_live)
            .ok_or_else(|| EngineError::not_found("Account", account_id))?;
        if account.kind != AccountKind::Investment {
            return Err(EngineError::validation(format!(
                "account {account_id} is not an investment account"
            )));
        }
        Ok(account)
    }

    /// The cash account a trade settles against. Without an explicit choice
    /// the owner's only live cash account is used.
    async fn settlement_account(&self, investment: &Account, requested: Option<&Id>) -> Result<Id> {
        let Some(account_id) = requested else {
            let cash: Vec<Account> = self
                .accounts
                .list_accounts(&investment.user_id)
                .await?
                .into_iter()
                .filter(|a| a.kind == AccountKind::Cash)
                .collect();
            return match cash.as_slice() {
                [only] => Ok(only.id.clone()),
                [] => Err(EngineError::validation(format!(
                    "user {} has no cash account to settle against",
                    investment.user_id
                ))),
                _ => Err(EngineError::validation(
                    "settlement_account_id is required when a user has several cash accounts",
                )),
            };
        };
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .filter(Account::is_live)
            .ok_or_else(|| EngineError::not_found("Account", account_id))?;
        if account.kind != AccountKind::Cash {
            return Err(EngineError::validation(format!(
                "account {account_id} is not a cash account"
            )));
        }
        if account.user_id != investment.user_id {
            return Err(EngineError::validation(
                "settlement account belongs to a different user",
            ));
        }
        Ok(account.id)
    }

    async fn require_security(&self, security_id: &Id) -> Result<()> {
        match self.storage.get_security(security_id).await? {
            Some(_) => Ok(()),
            None => Err(EngineError::not_found("Security", security_id)),
        }
    }

    async fn existing_holding(&self, key: &HoldingKey) -> Result<Holding> {
        self.storage
            .get_holding(&key.account_id, &key.security_id)
            .await?
            .ok_or_else(|| holding_not_found(key))
    }

    fn new_entry(
        &self,
        holding: &Holding,
        kind: EntryKind,
        date: NaiveDate,
        notes: Option<String>,
    ) -> LedgerEntry {
        LedgerEntry {
            id: self.ids.new_id(),
            holding_id: holding.id.clone(),
            account_id: holding.account_id.clone(),
            security_id: holding.security_id.clone(),
            kind,
            date,
            quantity_delta: Decimal::ZERO,
            price_per_unit: 0,
            total_amount: 0,
            fee: 0,
            realized_gain_loss: 0,
            split_ratio: None,
            dividend_kind: None,
            counterparty_account_id: None,
            settlement_account_id: None,
            notes: notes.unwrap_or_default(),
            recorded_at: self.clock.now(),
            removed_at: None,
        }
    }

    async fn move_cash(&self, movement: &CashMovement) -> std::result::Result<(), BalanceError> {
        if movement.amount == 0 {
            return Ok(());
        }
        match movement.direction {
            Direction::Debit => {
                self.accounts
                    .debit(&movement.account_id, movement.amount)
                    .await
            }
            Direction::Credit => {
                self.accounts
                    .credit(&movement.account_id, movement.amount)
                    .await
            }
        }
    }

    async fn settle_and_commit(
        &self,
        records: &[LedgerRecord],
        movement: Option<&CashMovement>,
    ) -> Result<()> {
        if let Some(movement) = movement {
            self.move_cash(movement).await.map_err(balance_error)?;
        }

        let Err(err) = self.storage.commit(records).await else {
            return Ok(());
        };

        if let Some(movement) = movement {
            if let Err(reversal) = self.move_cash(&movement.reversed()).await {
                tracing::error!(
                    account_id = %movement.account_id,
                    amount = movement.amount,
                    direction = ?movement.direction,
                    error = %reversal,
                    "Failed to reverse cash settlement after a failed commit"
                );
            }
        }
        Err(err.context("Failed to commit ledger records").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccountBook;
    use crate::clock::ManualClock;
    use crate::models::{AssetClass, FixedIdGenerator, Security, UuidIdGenerator};
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        accounts: Arc<MemoryAccountBook>,
        processor: TransactionProcessor,
    }

    async fn fixture_with(ids: Arc<dyn IdGenerator>, settings: LedgerSettings) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save_security(&Security {
                id: Id::from("vti"),
                symbol: "VTI".to_string(),
                name: "Vanguard Total Stock Market".to_string(),
                asset_class: AssetClass::Etf,
                currency: "USD".to_string(),
                exchange: None,
            })
            .await
            .unwrap();
        let accounts = Arc::new(MemoryAccountBook::with_accounts(vec![
            Account::new(
                Id::from("brokerage"),
                Id::from("u1"),
                "Brokerage",
                AccountKind::Investment,
            ),
            Account::new(Id::from("chk"), Id::from("u1"), "Checking", AccountKind::Cash)
                .with_balance(1_000_000),
            Account::new(Id::from("card"), Id::from("u1"), "Card", AccountKind::CreditCard),
        ]));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(),
        ));
        let processor =
            TransactionProcessor::new(storage.clone(), accounts.clone(), clock, ids, settings);
        Fixture {
            storage,
            accounts,
            processor,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(UuidIdGenerator), LedgerSettings::default()).await
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn trade(quantity: Decimal, price_per_unit: MinorUnits, fee: MinorUnits) -> TradeRequest {
        TradeRequest {
            account_id: Id::from("brokerage"),
            security_id: Id::from("vti"),
            quantity,
            price_per_unit,
            fee,
            date: date(),
            settlement_account_id: None,
            notes: None,
        }
    }

    async fn balance(f: &Fixture, account: &str) -> MinorUnits {
        f.accounts
            .get_account(&Id::from(account))
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn buy_debits_settlement_and_records_entry() -> Result<()> {
        let f = fixture().await;
        let record = f.processor.record_buy(trade(dec!(10), 10_000, 500)).await?;

        assert_eq!(record.holding.quantity, dec!(10));
        assert_eq!(record.holding.cost_basis, 100_500);
        assert_eq!(record.entry.total_amount, 100_500);
        assert_eq!(record.entry.settlement_account_id, Some(Id::from("chk")));
        assert_eq!(balance(&f, "chk").await, 1_000_000 - 100_500);
        Ok(())
    }

    #[tokio::test]
    async fn insufficient_cash_leaves_no_holding() -> Result<()> {
        let f = fixture().await;
        let err = f
            .processor
            .record_buy(trade(dec!(1000), 10_000, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        assert!(f
            .storage
            .get_holding(&Id::from("brokerage"), &Id::from("vti"))
            .await?
            .is_none());
        assert_eq!(balance(&f, "chk").await, 1_000_000);
        Ok(())
    }

    #[tokio::test]
    async fn failed_commit_reverses_the_cash_movement() -> Result<()> {
        // The second buy reuses entry id e-1, which storage rejects.
        let ids = Arc::new(FixedIdGenerator::new(
            ["h-1", "e-1", "e-1"].into_iter().map(Id::from),
        ));
        let f = fixture_with(ids, LedgerSettings::default()).await;
        f.processor.record_buy(trade(dec!(1), 10_000, 0)).await?;

        let err = f
            .processor
            .record_buy(trade(dec!(2), 10_000, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
        assert_eq!(balance(&f, "chk").await, 1_000_000 - 10_000);
        let holding = f.processor.holding(&Id::from("brokerage"), &Id::from("vti")).await?;
        assert_eq!(holding.quantity, dec!(1));
        Ok(())
    }

    #[tokio::test]
    async fn sell_credits_net_proceeds_to_chosen_account() -> Result<()> {
        let f = fixture().await;
        f.processor.record_buy(trade(dec!(4), 100, 0)).await?;
        f.accounts
            .save_account(Account::new(
                Id::from("savings"),
                Id::from("u1"),
                "Savings",
                AccountKind::Cash,
            ))
            .await;

        let mut sell = trade(dec!(2), 150, 30);
        sell.settlement_account_id = Some(Id::from("savings"));
        let record = f.processor.record_sell(sell).await?;

        assert_eq!(record.entry.quantity_delta, dec!(-2));
        assert_eq!(record.entry.total_amount, 270);
        assert_eq!(record.entry.realized_gain_loss, 70);
        assert_eq!(balance(&f, "savings").await, 270);
        assert_eq!(balance(&f, "chk").await, 1_000_000 - 400);

        // Two cash accounts leave no default to settle against.
        let err = f
            .processor
            .record_sell(trade(dec!(1), 150, 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        Ok(())
    }

    #[tokio::test]
    async fn only_cash_accounts_settle() -> Result<()> {
        let f = fixture().await;
        for account in ["card", "brokerage"] {
            let mut buy = trade(dec!(1), 100, 0);
            buy.settlement_account_id = Some(Id::from(account));
            let err = f.processor.record_buy(buy).await.unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{account}: {err:?}");
        }
        assert_eq!(balance(&f, "chk").await, 1_000_000);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_bad_inputs_before_touching_state() -> Result<()> {
        let f = fixture().await;
        for bad in [
            trade(Decimal::ZERO, 100, 0),
            trade(dec!(-1), 100, 0),
            trade(dec!(0.000000001), 100, 0),
            trade(dec!(1), -1, 0),
            trade(dec!(1), 100, -5),
        ] {
            let err = f.processor.record_buy(bad).await.unwrap_err();
            assert_eq!(err.code(), "INVALID_INPUT");
        }

        let mut unknown = trade(dec!(1), 100, 0);
        unknown.security_id = Id::from("nope");
        assert_eq!(
            f.processor.record_buy(unknown).await.unwrap_err().code(),
            "NOT_FOUND"
        );

        let mut cash_account = trade(dec!(1), 100, 0);
        cash_account.account_id = Id::from("chk");
        assert_eq!(
            f.processor.record_buy(cash_account).await.unwrap_err().code(),
            "INVALID_INPUT"
        );
        assert_eq!(balance(&f, "chk").await, 1_000_000);
        Ok(())
    }

    #[tokio::test]
    async fn sell_without_holding_is_not_found() {
        let f = fixture().await;
        let err = f
            .processor
            .record_sell(trade(dec!(1), 100, 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn cash_dividend_credits_without_touching_position() -> Result<()> {
        let f = fixture().await;
        let bought = f.processor.record_buy(trade(dec!(10), 1_000, 0)).await?;

        let record = f
            .processor
            .record_dividend(DividendRequest {
                account_id: Id::from("brokerage"),
                security_id: Id::from("vti"),
                kind: DividendKind::Cash,
                total_amount: 1_234,
                quantity: None,
                date: date(),
                settlement_account_id: None,
                notes: Some("Q1".to_string()),
            })
            .await?;

        assert_eq!(record.holding.quantity, bought.holding.quantity);
        assert_eq!(record.holding.cost_basis, bought.holding.cost_basis);
        assert_eq!(record.entry.dividend_kind, Some(DividendKind::Cash));
        assert_eq!(balance(&f, "chk").await, 1_000_000 - 10_000 + 1_234);
        Ok(())
    }

    #[tokio::test]
    async fn stock_dividend_cost_follows_settings() -> Result<()> {
        let request = DividendRequest {
            account_id: Id::from("brokerage"),
            security_id: Id::from("vti"),
            kind: DividendKind::Stock,
            total_amount: 500,
            quantity: Some(dec!(0.5)),
            date: date(),
            settlement_account_id: None,
            notes: None,
        };

        let zero = fixture_with(
            Arc::new(UuidIdGenerator),
            LedgerSettings {
                stock_dividend_cost: StockDividendCost::Zero,
                ..LedgerSettings::default()
            },
        )
        .await;
        zero.processor.record_buy(trade(dec!(10), 1_000, 0)).await?;
        let record = zero.processor.record_dividend(request.clone()).await?;
        assert_eq!(record.holding.quantity, dec!(10.5));
        assert_eq!(record.holding.cost_basis, 10_000);
        assert_eq!(record.entry.total_amount, 500);
        assert_eq!(balance(&zero, "chk").await, 1_000_000 - 10_000);

        let declared = fixture().await;
        declared.processor.record_buy(trade(dec!(10), 1_000, 0)).await?;
        let record = declared.processor.record_dividend(request).await?;
        assert_eq!(record.holding.cost_basis, 10_500);
        assert_eq!(record.entry.price_per_unit, 1_000);
        Ok(())
    }

    #[tokio::test]
    async fn split_and_transfer_keep_totals() -> Result<()> {
        let f = fixture().await;
        f.accounts
            .save_account(Account::new(
                Id::from("ira"),
                Id::from("u1"),
                "IRA",
                AccountKind::Investment,
            ))
            .await;

        f.processor.record_buy(trade(dec!(15), 11_025, 0)).await?;
        let split = f
            .processor
            .record_split(SplitRequest {
                account_id: Id::from("brokerage"),
                security_id: Id::from("vti"),
                ratio: dec!(2),
                date: date(),
                notes: None,
            })
            .await?;
        assert_eq!(split.holding.quantity, dec!(30));
        assert_eq!(split.entry.quantity_delta, dec!(15));
        assert_eq!(split.entry.split_ratio, Some(dec!(2)));

        let moved = f
            .processor
            .record_transfer(TransferRequest {
                from_account_id: Id::from("brokerage"),
                to_account_id: Id::from("ira"),
                security_id: Id::from("vti"),
                quantity: dec!(10),
                date: date(),
                notes: None,
            })
            .await?;
        assert_eq!(moved.outgoing.holding.quantity, dec!(20));
        assert_eq!(moved.incoming.holding.quantity, dec!(10));
        assert_eq!(
            moved.outgoing.holding.cost_basis + moved.incoming.holding.cost_basis,
            165_375
        );
        assert_eq!(moved.incoming.entry.counterparty_account_id, Some(Id::from("brokerage")));
        Ok(())
    }

    #[tokio::test]
    async fn removal_and_history_paging() -> Result<()> {
        let f = fixture().await;
        let first = f.processor.record_buy(trade(dec!(1), 100, 0)).await?;
        for _ in 0..4 {
            f.processor.record_buy(trade(dec!(1), 100, 0)).await?;
        }

        let removed = f.processor.remove_entry(&first.entry.id).await?;
        assert!(removed.is_removed());
        let again = f.processor.remove_entry(&first.entry.id).await.unwrap_err();
        assert_eq!(again.code(), "CONFLICT");

        let page = f
            .processor
            .ledger_history(&Id::from("brokerage"), &Id::from("vti"), PageRequest::new(1, 3))
            .await?;
        assert_eq!(page.total_items, 4);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.data.len(), 3);
        assert!(page.data.iter().all(|e| e.id != first.entry.id));

        // Removal is audit-only; the position still includes the removed buy.
        let holding = f.processor.holding(&Id::from("brokerage"), &Id::from("vti")).await?;
        assert_eq!(holding.quantity, dec!(5));
        Ok(())
    }
}
