//! Persistence for crash recovery
//!
//! - Atomic checkpoint of ledger, capital mode and proposal cursor
//! - Append-only promotion and rollback audit logs, keyed by tick
//! - Readers for metrics, proposals, trades and operator commands

pub mod audit_log;
pub mod inputs;
pub mod retry;
pub mod store;

pub use audit_log::{AuditEntry, AuditLog};
pub use inputs::{InputReader, OperatorQueue};
pub use retry::RetryPolicy;
pub use store::{FileStateStore, GateCheckpoint, StateStore, TickCommit, CHECKPOINT_VERSION};

#[cfg(test)]
pub use store::MockStateStore;
