//! Price store collaborator. Prices are pushed in by an external ingestion
//! pipeline; the engine only asks for the latest price as of a time.

mod jsonl_store;
mod store;

pub use jsonl_store::JsonlPriceStore;
pub use store::{MemoryPriceStore, NullPriceStore, PriceStore};
