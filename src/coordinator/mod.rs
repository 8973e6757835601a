//! Reconciliation coordinator
//!
//! Owns the gate state between ticks and is the only writer of the ledger.
//! Readers go through the `SnapshotPublisher` handed out by `Reconciler::publisher`.

pub mod reconciler;
pub mod state;

pub use reconciler::{Reconciler, TickReport};
pub use state::GateState;
