//! Investment ledger and portfolio accounting engine.
//!
//! [`engine::Engine`] is the entry point. It records buys, sells, dividends,
//! splits and transfers against holdings with weighted-average cost basis,
//! values portfolios from the latest recorded prices, and writes immutable
//! net-worth snapshots.

pub mod accounts;
pub mod clock;
pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod market_data;
pub mod models;
pub mod money;
pub mod pagination;
pub mod portfolio;
pub mod storage;
