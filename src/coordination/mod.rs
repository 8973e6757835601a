//! Portfolio-wide coordination
//!
//! - Capital-mode gate: normal / de_risk / halt_new_entries with hysteresis

pub mod capital_mode;

pub use capital_mode::{
    CapitalModeGate, GATE_DRAWDOWN_FLOOR, GATE_DRAWDOWN_HALT, GATE_METRICS_AVAILABLE,
    GATE_METRICS_FRESH, GATE_PF7D_FLOOR, GATE_PF7D_HALT_FLOOR,
};
