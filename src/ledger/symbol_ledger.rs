//! Symbol Ledger
//!
//! Sole owner of per-symbol admission state. Every mutation ends in
//! `recompute_allowances`, so readers never see a grant recorded while the lane
//! flags are stale.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::block::{BlockReason, SlotUsage};
use crate::config::LedgerConfig;
use crate::domain::{CapitalMode, Lane, PromotionGrant, SymbolMetrics, SymbolState, Tier};
use crate::error::{GateError, Result};

/// Lane flags derived from tier, quarantine and grant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneAllowances {
    pub core: bool,
    pub exploration: bool,
    pub recovery: bool,
}

impl LaneAllowances {
    pub fn allows(&self, lane: Lane) -> bool {
        match lane {
            Lane::Core => self.core,
            Lane::Exploration => self.exploration,
            Lane::Recovery => self.recovery,
        }
    }

    /// Baseline lanes a tier opens on its own
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Tier1 => Self {
                core: true,
                exploration: true,
                recovery: true,
            },
            Tier::Tier2 => Self {
                core: false,
                exploration: true,
                recovery: true,
            },
            Tier::Tier3 => Self {
                core: false,
                exploration: false,
                recovery: true,
            },
        }
    }
}

/// Deterministic function of (tier, quarantine, active grant)
pub fn derive_allowances(state: &SymbolState, now: DateTime<Utc>) -> LaneAllowances {
    if state.quarantined {
        return LaneAllowances::default();
    }

    let mut allowances = LaneAllowances::for_tier(state.tier);
    if state.active_grant(now).is_some() {
        allowances.core = true;
        allowances.exploration = true;
    }
    allowances
}

#[derive(Debug, Clone)]
pub struct SymbolLedger {
    config: LedgerConfig,
    symbols: BTreeMap<String, SymbolState>,
}

impl SymbolLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            symbols: BTreeMap::new(),
        }
    }

    /// Rebuild from checkpointed records, re-deriving every allowance
    pub fn from_states(
        config: LedgerConfig,
        states: impl IntoIterator<Item = SymbolState>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut ledger = Self::new(config);
        for state in states {
            ledger.symbols.insert(state.symbol.clone(), state);
        }
        ledger.recompute_all(now);
        ledger
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolState> {
        self.symbols.get(symbol)
    }

    pub fn states(&self) -> impl Iterator<Item = &SymbolState> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Record view as of `now`: lane flags re-derived so an expired grant is
    /// never reported as open, even between ticks.
    pub fn view(&self, symbol: &str, now: DateTime<Utc>) -> Option<SymbolState> {
        self.symbols.get(symbol).map(|state| {
            let mut view = state.clone();
            Self::write_allowances(&mut view, derive_allowances(state, now));
            view
        })
    }

    /// Lazily create the record for a newly observed symbol
    pub fn observe(&mut self, symbol: &str, now: DateTime<Utc>) -> &SymbolState {
        self.entry(symbol, now)
    }

    /// Fold one symbol's metrics into the ledger
    pub fn apply_metrics(&mut self, metrics: &SymbolMetrics, now: DateTime<Utc>) {
        let state = self.entry(&metrics.symbol, now);
        if let Some(tier) = metrics.tier {
            state.tier = tier;
        }
        state.pf_7d = metrics.pf_7d;
        state.closes_7d = metrics.closes_7d;

        if metrics.quarantined {
            let reason = metrics
                .quarantine_reason
                .clone()
                .unwrap_or_else(|| "external quarantine".to_string());
            if !state.quarantined {
                warn!(symbol = %metrics.symbol, %reason, "symbol quarantined");
            }
            state.quarantined = true;
            state.quarantine_reason = Some(reason);
        } else if let Some(reason) = state.operator_quarantine.clone() {
            state.quarantined = true;
            state.quarantine_reason = Some(reason);
        } else if state.quarantined {
            info!(symbol = %metrics.symbol, "quarantine released");
            state.quarantined = false;
            state.quarantine_reason = None;
        }

        self.recompute_allowances(&metrics.symbol, now);
    }

    /// Operator hold. Only `release_quarantine` lifts it.
    pub fn quarantine(&mut self, symbol: &str, reason: &str, now: DateTime<Utc>) {
        let state = self.entry(symbol, now);
        state.operator_quarantine = Some(reason.to_string());
        state.quarantined = true;
        state.quarantine_reason = Some(reason.to_string());
        warn!(%symbol, %reason, "symbol quarantined by operator");
        self.recompute_allowances(symbol, now);
    }

    /// Lift the operator hold. A metrics quarantine is re-applied with the next
    /// metrics row for the symbol.
    pub fn release_quarantine(&mut self, symbol: &str, now: DateTime<Utc>) -> bool {
        let Some(state) = self.symbols.get_mut(symbol) else {
            return false;
        };
        if state.operator_quarantine.take().is_none() {
            return false;
        }
        state.quarantined = false;
        state.quarantine_reason = None;
        info!(%symbol, "operator quarantine released");
        self.recompute_allowances(symbol, now);
        true
    }

    /// Install a fresh grant, replacing any disabled or expired one
    pub fn set_grant(&mut self, grant: PromotionGrant, now: DateTime<Utc>) {
        let symbol = grant.symbol.clone();
        self.entry(&symbol, now).promotion = Some(grant);
        self.recompute_allowances(&symbol, now);
    }

    /// Disable the symbol's grant; returns the grant as it was before revocation
    pub fn revoke_grant(&mut self, symbol: &str, now: DateTime<Utc>) -> Option<PromotionGrant> {
        let previous = self
            .symbols
            .get_mut(symbol)
            .and_then(|state| state.promotion.as_mut())
            .filter(|grant| grant.enabled)
            .map(|grant| {
                let before = grant.clone();
                grant.disable();
                before
            });
        self.recompute_allowances(symbol, now);
        previous
    }

    /// Symbols whose grant is still enabled (possibly expired)
    pub fn enabled_grants(&self) -> Vec<PromotionGrant> {
        self.symbols
            .values()
            .filter_map(|s| s.promotion.as_ref())
            .filter(|g| g.enabled)
            .cloned()
            .collect()
    }

    /// Idempotent; safe to call any number of times
    pub fn recompute_allowances(&mut self, symbol: &str, now: DateTime<Utc>) {
        if let Some(state) = self.symbols.get_mut(symbol) {
            let allowances = derive_allowances(state, now);
            Self::write_allowances(state, allowances);
        }
    }

    pub fn recompute_all(&mut self, now: DateTime<Utc>) {
        for state in self.symbols.values_mut() {
            let allowances = derive_allowances(state, now);
            Self::write_allowances(state, allowances);
        }
    }

    /// Every reason the symbol cannot open a position in `lane`, in precedence order
    pub fn is_blocked(
        &self,
        symbol: &str,
        lane: Lane,
        slots: SlotUsage,
        mode: CapitalMode,
        now: DateTime<Utc>,
    ) -> Vec<BlockReason> {
        let mut reasons = Vec::new();

        let unknown;
        let state = match self.symbols.get(symbol) {
            Some(state) => state,
            None => {
                reasons.push(BlockReason::UnknownSymbol);
                unknown = SymbolState::new(symbol);
                &unknown
            }
        };
        let allowances = derive_allowances(state, now);
        let grant = state.active_grant(now);

        if state.quarantined {
            reasons.push(BlockReason::Quarantined {
                reason: state
                    .quarantine_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            });
        }
        if !allowances.allows(lane) {
            reasons.push(BlockReason::LaneNotAllowed { lane });
        }

        if let Some(expired) = state
            .promotion
            .as_ref()
            .filter(|g| g.enabled && g.is_expired(now))
        {
            reasons.push(BlockReason::PromotionExpired {
                expired_at: expired.expires_at,
            });
        }

        if self.capital_mode_blocks(state, lane, mode, now) {
            reasons.push(BlockReason::CapitalMode { mode, lane });
        }

        if self.config.max_global_positions > 0 && slots.global_open >= self.config.max_global_positions
        {
            reasons.push(BlockReason::GlobalSlotsFull {
                limit: self.config.max_global_positions,
                open: slots.global_open,
            });
        }

        let symbol_limit = grant
            .map(|g| g.max_positions)
            .unwrap_or(self.config.max_positions_per_symbol);
        if symbol_limit > 0 && slots.symbol_open >= symbol_limit {
            reasons.push(BlockReason::SymbolSlotsFull {
                limit: symbol_limit,
                open: slots.symbol_open,
            });
        }

        if !reasons.is_empty() {
            debug!(%symbol, %lane, count = reasons.len(), "symbol blocked");
        }
        reasons
    }

    fn capital_mode_blocks(
        &self,
        state: &SymbolState,
        lane: Lane,
        mode: CapitalMode,
        now: DateTime<Utc>,
    ) -> bool {
        match (mode, lane) {
            (CapitalMode::Normal, _) => false,
            (CapitalMode::HaltNewEntries, _) => true,
            (CapitalMode::DeRisk, Lane::Recovery) => false,
            (CapitalMode::DeRisk, Lane::Exploration) => true,
            (CapitalMode::DeRisk, Lane::Core) => !self.promotion_bypass(state, now),
        }
    }

    /// An active grant backed by adequate PF may keep trading core in de_risk
    fn promotion_bypass(&self, state: &SymbolState, now: DateTime<Utc>) -> bool {
        state.active_grant(now).is_some()
            && state.closes_7d >= self.config.bypass_min_closes
            && state
                .pf_7d
                .map(|pf| pf >= self.config.bypass_pf_floor)
                .unwrap_or(false)
    }

    /// Check every record against the ledger invariants as of `now`
    pub fn validate_invariants(&self, now: DateTime<Utc>) -> Result<()> {
        for state in self.symbols.values() {
            if state.quarantined && state.any_lane_open() {
                return Err(GateError::InvariantViolation(format!(
                    "{} is quarantined but has an open lane",
                    state.symbol
                )));
            }
            let derived = derive_allowances(state, now);
            if derived.core != state.allow_core
                || derived.exploration != state.allow_exploration
                || derived.recovery != state.allow_recovery
            {
                return Err(GateError::InvariantViolation(format!(
                    "{} lane flags are stale (stored core={} exploration={} recovery={}, derived {:?})",
                    state.symbol,
                    state.allow_core,
                    state.allow_exploration,
                    state.allow_recovery,
                    derived
                )));
            }
            if let Some(grant) = &state.promotion {
                if grant.symbol != state.symbol {
                    return Err(GateError::InvariantViolation(format!(
                        "{} holds a grant issued for {}",
                        state.symbol, grant.symbol
                    )));
                }
            }
        }
        Ok(())
    }

    fn entry(&mut self, symbol: &str, now: DateTime<Utc>) -> &mut SymbolState {
        self.symbols.entry(symbol.to_string()).or_insert_with(|| {
            debug!(%symbol, "first observation, creating least-privilege record");
            let mut state = SymbolState::new(symbol);
            let allowances = derive_allowances(&state, now);
            Self::write_allowances(&mut state, allowances);
            state
        })
    }

    fn write_allowances(state: &mut SymbolState, allowances: LaneAllowances) {
        state.allow_core = allowances.core;
        state.allow_exploration = allowances.exploration;
        state.allow_recovery = allowances.recovery;
    }

    #[cfg(test)]
    pub(crate) fn state_mut_for_test(&mut self, symbol: &str) -> Option<&mut SymbolState> {
        self.symbols.get_mut(symbol)
    }
}
