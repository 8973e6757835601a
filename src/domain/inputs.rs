//! Records produced by external collaborators and consumed read-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::symbol::Tier;
use crate::error::{GateError, Result};

/// Rolling metrics for one reconciliation tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub portfolio: PortfolioMetrics,
    /// Externally evaluated safety gates, keyed by name
    #[serde(default)]
    pub gates: BTreeMap<String, bool>,
    #[serde(default)]
    pub symbols: Vec<SymbolMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub pf_7d: Option<f64>,
    pub drawdown: Option<f64>,
    #[serde(default)]
    pub closes_7d: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetrics {
    pub symbol: String,
    /// Reflection output; absent means "keep the current tier"
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub pf_7d: Option<f64>,
    #[serde(default)]
    pub closes_7d: u32,
    #[serde(default)]
    pub quarantined: bool,
    #[serde(default)]
    pub quarantine_reason: Option<String>,
}

impl SymbolMetrics {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(GateError::InvalidRecord("empty symbol".to_string()));
        }
        if let Some(pf) = self.pf_7d {
            if !pf.is_finite() || pf < 0.0 {
                return Err(GateError::InvalidRecord(format!(
                    "{}: pf_7d {} is not a finite non-negative number",
                    self.symbol, pf
                )));
            }
        }
        Ok(())
    }
}

/// One line of the promotion proposal stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub symbol: String,
    #[serde(default)]
    pub rationale: String,
    pub ts: DateTime<Utc>,
}

impl Proposal {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(GateError::InvalidRecord("proposal without symbol".to_string()));
        }
        Ok(())
    }
}

/// A closed trade with its signed percentage return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub ret_pct: f64,
}

impl TradeOutcome {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(GateError::InvalidRecord("trade without symbol".to_string()));
        }
        if !self.ret_pct.is_finite() {
            return Err(GateError::InvalidRecord(format!(
                "{}: non-finite ret_pct",
                self.symbol
            )));
        }
        Ok(())
    }
}

/// Operator override appended to the command stream by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OperatorAction {
    /// Force the capital mode to halt_new_entries
    Halt { reason: String },
    /// Hold a symbol in quarantine regardless of what metrics report
    Quarantine { symbol: String, reason: String },
    /// Lift an operator hold; metrics quarantine still applies
    Release { symbol: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorCommand {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub action: OperatorAction,
}

impl OperatorCommand {
    pub fn new(action: OperatorAction, ts: DateTime<Utc>) -> Self {
        Self { ts, action }
    }

    pub fn validate(&self) -> Result<()> {
        let (symbol, reason) = match &self.action {
            OperatorAction::Halt { reason } => (None, Some(reason)),
            OperatorAction::Quarantine { symbol, reason } => (Some(symbol), Some(reason)),
            OperatorAction::Release { symbol } => (Some(symbol), None),
        };
        if symbol.is_some_and(|s| s.trim().is_empty()) {
            return Err(GateError::InvalidRecord("operator command without symbol".to_string()));
        }
        if reason.is_some_and(|r| r.trim().is_empty()) {
            return Err(GateError::InvalidRecord("operator command without reason".to_string()));
        }
        Ok(())
    }
}
