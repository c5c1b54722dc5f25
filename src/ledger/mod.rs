//! Holding and ledger writes: cost-basis arithmetic, per-holding locking and
//! the transaction processor that ties them to storage and cash settlement.

pub mod cost_basis;
mod locks;
mod processor;

pub use locks::{HoldingGuard, HoldingLocks};
pub use processor::{
    BuyRequest, DividendRequest, LedgerSettings, SellRequest, SplitRequest, StockDividendCost,
    TradeRequest, TransactionProcessor, TransferRecords, TransferRequest,
};
