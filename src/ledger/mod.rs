//! Per-symbol admission ledger and its published snapshot.

pub mod block;
pub mod snapshot;
pub mod symbol_ledger;

pub use block::{BlockReason, SlotUsage};
pub use snapshot::{GateSnapshot, SnapshotPublisher};
pub use symbol_ledger::{derive_allowances, LaneAllowances, SymbolLedger};
