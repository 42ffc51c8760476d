//! Transaction assembly for the agreed swap.

pub mod builder;
pub mod settlement;

pub use builder::{TxBatch, TxBatchBuilder, SWAP_DEADLINE_SECS};
pub use settlement::SettlementPayload;
