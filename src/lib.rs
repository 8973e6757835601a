pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod risk;
pub mod safety;

pub use config::AppConfig;
pub use coordination::CapitalModeGate;
pub use coordinator::{GateState, Reconciler, TickReport};
pub use domain::{
    CapitalMode, CapitalModeState, Lane, PromotionGrant, PromotionRecord, RollbackRecord,
    SymbolState, Tier,
};
pub use engine::{PromotionEngine, ProposalOutcome, RollbackEngine};
pub use error::{GateError, Result};
pub use ledger::{BlockReason, GateSnapshot, SlotUsage, SnapshotPublisher, SymbolLedger};
pub use persistence::{FileStateStore, InputReader, OperatorQueue, RetryPolicy, StateStore};
pub use risk::compute_multiplier;
pub use safety::{SanityGate, SanityVerdict, Severity, TradeCandidate};
