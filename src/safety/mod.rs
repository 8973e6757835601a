//! Pre-trade safety checks.

pub mod sanity_gate;

pub use sanity_gate::{evaluate, SanityGate, SanityVerdict, Severity, TradeCandidate};
