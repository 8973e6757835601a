//! Mutable gate state owned by the reconciler between ticks

use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::coordination::CapitalModeGate;
use crate::domain::ProcessingCursor;
use crate::ledger::{GateSnapshot, SymbolLedger};
use crate::persistence::{GateCheckpoint, CHECKPOINT_VERSION};

/// Everything a tick reads and writes. Cloned at the start of a tick so a
/// failed tick leaves the committed copy untouched.
#[derive(Debug, Clone)]
pub struct GateState {
    pub tick_seq: u64,
    pub capital: CapitalModeGate,
    pub ledger: SymbolLedger,
    pub cursor: ProcessingCursor,
}

impl GateState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tick_seq: 0,
            capital: CapitalModeGate::new(config.capital_mode.clone()),
            ledger: SymbolLedger::new(config.ledger.clone()),
            cursor: ProcessingCursor::default(),
        }
    }

    /// Rebuild from a checkpoint. Lane flags are re-derived rather than trusted.
    pub fn from_checkpoint(config: &AppConfig, checkpoint: GateCheckpoint, now: DateTime<Utc>) -> Self {
        Self {
            tick_seq: checkpoint.tick_seq,
            capital: CapitalModeGate::from_state(config.capital_mode.clone(), checkpoint.capital),
            ledger: SymbolLedger::from_states(config.ledger.clone(), checkpoint.symbols, now),
            cursor: checkpoint.cursor,
        }
    }

    pub fn to_checkpoint(&self, now: DateTime<Utc>) -> GateCheckpoint {
        GateCheckpoint {
            version: CHECKPOINT_VERSION,
            tick_seq: self.tick_seq,
            committed_at: now,
            symbols: self.ledger.states().cloned().collect(),
            capital: self.capital.state().clone(),
            cursor: self.cursor.clone(),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> GateSnapshot {
        GateSnapshot {
            tick_seq: self.tick_seq,
            as_of: now,
            capital: self.capital.state().clone(),
            ledger: self.ledger.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CapitalMode, PromotionGrant, Tier};
    use chrono::{Duration, TimeZone};

    #[test]
    fn checkpoint_round_trip_rederives_lanes() {
        let config = AppConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut state = GateState::new(&config);
        state.tick_seq = 7;
        state.ledger.observe("ETH", now);
        state.ledger.set_grant(
            PromotionGrant::new("ETH", "proposal_stream", now, Duration::hours(48), 0.5, 1),
            now,
        );
        state.capital.manual_halt("drill", now);

        let mut checkpoint = state.to_checkpoint(now);
        // Tamper with a stored flag; restore must not trust it.
        checkpoint.symbols[0].allow_core = false;

        let restored = GateState::from_checkpoint(&config, checkpoint, now);
        assert_eq!(restored.tick_seq, 7);
        assert_eq!(restored.capital.mode(), CapitalMode::HaltNewEntries);
        let eth = restored.ledger.get("ETH").unwrap();
        assert_eq!(eth.tier, Tier::Tier3);
        assert!(eth.allow_core);
        assert!(restored.ledger.validate_invariants(now).is_ok());
    }
}
