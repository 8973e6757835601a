//! Copy-on-write snapshot published at the end of every committed tick.
//!
//! Sanity checks read the latest `Arc<GateSnapshot>` and never observe a tick
//! that is still being computed.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

use super::block::{BlockReason, SlotUsage};
use super::symbol_ledger::SymbolLedger;
use crate::domain::{CapitalModeState, Lane};
use crate::error::{GateError, Result};

#[derive(Debug, Clone)]
pub struct GateSnapshot {
    pub tick_seq: u64,
    pub as_of: DateTime<Utc>,
    pub capital: CapitalModeState,
    pub ledger: SymbolLedger,
}

impl GateSnapshot {
    pub fn validate(&self) -> Result<()> {
        self.ledger.validate_invariants(self.as_of)
    }

    pub fn is_blocked(
        &self,
        symbol: &str,
        lane: Lane,
        slots: SlotUsage,
        now: DateTime<Utc>,
    ) -> Vec<BlockReason> {
        self.ledger
            .is_blocked(symbol, lane, slots, self.capital.mode, now)
    }
}

/// Single-writer, many-reader handle to the latest validated snapshot
#[derive(Debug, Clone, Default)]
pub struct SnapshotPublisher {
    current: Arc<RwLock<Option<Arc<GateSnapshot>>>>,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and swap in a new snapshot; an invalid one is refused and the
    /// previous snapshot stays in force.
    pub fn publish(&self, snapshot: GateSnapshot) -> Result<()> {
        if let Err(e) = snapshot.validate() {
            error!(tick_seq = snapshot.tick_seq, error = %e, "refusing to publish invalid snapshot");
            return Err(e);
        }

        let tick_seq = snapshot.tick_seq;
        let mut guard = self
            .current
            .write()
            .map_err(|_| GateError::Internal("snapshot lock poisoned".to_string()))?;
        *guard = Some(Arc::new(snapshot));
        debug!(tick_seq, "snapshot published");
        Ok(())
    }

    pub fn latest(&self) -> Result<Arc<GateSnapshot>> {
        let guard = self
            .current
            .read()
            .map_err(|_| GateError::Internal("snapshot lock poisoned".to_string()))?;
        guard.clone().ok_or(GateError::SnapshotUnavailable)
    }
}
