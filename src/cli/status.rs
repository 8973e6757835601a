//! Table rows for `ploy-gate status`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use crate::domain::{CapitalModeState, SymbolState};
use crate::ledger::SymbolLedger;

#[derive(Debug, Serialize, Tabled)]
pub struct SymbolRow {
    pub symbol: String,
    pub tier: String,
    pub core: bool,
    pub exploration: bool,
    pub recovery: bool,
    pub quarantine: String,
    pub pf_7d: String,
    pub grant: String,
}

impl SymbolRow {
    pub fn from_state(state: &SymbolState, now: DateTime<Utc>) -> Self {
        let grant = match &state.promotion {
            Some(g) if g.is_active(now) => format!("until {}", g.expires_at.format("%Y-%m-%d %H:%M")),
            Some(g) if g.enabled => "expired".to_string(),
            Some(_) => "revoked".to_string(),
            None => "-".to_string(),
        };
        Self {
            symbol: state.symbol.clone(),
            tier: state.tier.to_string(),
            core: state.allow_core,
            exploration: state.allow_exploration,
            recovery: state.allow_recovery,
            quarantine: state.quarantine_reason.clone().unwrap_or_else(|| "-".to_string()),
            pf_7d: state
                .pf_7d
                .map(|pf| format!("{pf:.2}"))
                .unwrap_or_else(|| "-".to_string()),
            grant,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct GateRow {
    pub gate: String,
    pub pass: bool,
}

/// Rows as of `now`, so grants that lapsed since the last tick show closed lanes
pub fn symbol_rows(ledger: &SymbolLedger, now: DateTime<Utc>) -> Vec<SymbolRow> {
    ledger
        .states()
        .filter_map(|s| ledger.view(&s.symbol, now))
        .map(|view| SymbolRow::from_state(&view, now))
        .collect()
}

pub fn gate_rows(capital: &CapitalModeState) -> Vec<GateRow> {
    capital
        .gates
        .iter()
        .map(|(gate, pass)| GateRow {
            gate: gate.clone(),
            pass: *pass,
        })
        .collect()
}
