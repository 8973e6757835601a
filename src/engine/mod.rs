//! Per-tick engines that mutate the symbol ledger.

pub mod operator;
pub mod promotion;
pub mod rollback;
pub mod stats;

pub use operator::{apply_operator_commands, OperatorLine, OperatorOutcome};
pub use promotion::{PromotionEngine, PromotionPass, ProposalLine, ProposalOutcome};
pub use rollback::RollbackEngine;
pub use stats::WindowStats;
