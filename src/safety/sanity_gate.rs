//! Sanity Gate
//!
//! Final synchronous check in front of order placement. Reads the latest
//! published snapshot, never writes. Unlike `is_blocked`, evaluation is strict
//! first-match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::config::SanityConfig;
use crate::domain::Lane;
use crate::error::Result;
use crate::ledger::{GateSnapshot, LaneAllowances, SlotUsage, SnapshotPublisher};
use crate::risk::MultiplierInputs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    Warn,
    HardBlock,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "ok"),
            Severity::Warn => write!(f, "warn"),
            Severity::HardBlock => write!(f, "hard_block"),
        }
    }
}

/// A candidate order as seen by the gate. Missing metrics fall back to the
/// ledger's `pf_7d` or to neutral values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub symbol: String,
    pub lane: Option<Lane>,
    pub pf_local: Option<f64>,
    pub drawdown: Option<f64>,
    pub edge: Option<f64>,
    pub volatility: Option<f64>,
    pub confidence: Option<f64>,
    pub regime_strength: Option<f64>,
    #[serde(default)]
    pub weighted_sample: f64,
    #[serde(default)]
    pub blind_spot: bool,
    #[serde(default)]
    pub slots: SlotUsage,
}

impl TradeCandidate {
    pub fn new(symbol: impl Into<String>, lane: Lane) -> Self {
        Self {
            symbol: symbol.into(),
            lane: Some(lane),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityVerdict {
    pub allow: bool,
    pub severity: Severity,
    /// Never empty on a deny
    pub reasons: Vec<String>,
    /// Sizing scalar for allowed trades
    pub risk_multiplier: Option<f64>,
    pub tick_seq: u64,
}

impl SanityVerdict {
    fn deny(severity: Severity, reasons: Vec<String>, tick_seq: u64) -> Self {
        Self {
            allow: false,
            severity,
            reasons,
            risk_multiplier: None,
            tick_seq,
        }
    }

    fn allow(severity: Severity, reasons: Vec<String>, mult: f64, tick_seq: u64) -> Self {
        Self {
            allow: true,
            severity,
            reasons,
            risk_multiplier: Some(mult),
            tick_seq,
        }
    }
}

impl fmt::Display for SanityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.allow { "ALLOW" } else { "DENY" };
        write!(f, "{} [{}]", verb, self.severity)?;
        if let Some(mult) = self.risk_multiplier {
            write!(f, " x{:.2}", mult)?;
        }
        if !self.reasons.is_empty() {
            write!(f, ": {}", self.reasons.join("; "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SanityGate {
    config: SanityConfig,
    snapshots: SnapshotPublisher,
}

impl SanityGate {
    pub fn new(config: SanityConfig, snapshots: SnapshotPublisher) -> Self {
        Self { config, snapshots }
    }

    /// Evaluate one candidate against the latest published snapshot
    pub fn check(&self, candidate: &TradeCandidate, now: DateTime<Utc>) -> Result<SanityVerdict> {
        let snapshot = self.snapshots.latest()?;
        let verdict = evaluate(&self.config, &snapshot, candidate, now)?;
        if verdict.allow {
            debug!(symbol = %candidate.symbol, %verdict, "sanity gate");
        } else {
            warn!(symbol = %candidate.symbol, %verdict, "sanity gate denied");
        }
        Ok(verdict)
    }
}

/// Pure evaluation against an explicit snapshot
pub fn evaluate(
    config: &SanityConfig,
    snapshot: &GateSnapshot,
    candidate: &TradeCandidate,
    now: DateTime<Utc>,
) -> Result<SanityVerdict> {
    // A ledger that fails validation is never served
    snapshot.validate()?;

    let seq = snapshot.tick_seq;
    let lane = candidate.lane.unwrap_or(Lane::Core);
    let state = snapshot.ledger.get(&candidate.symbol);

    let blocked = snapshot.is_blocked(&candidate.symbol, lane, candidate.slots, now);
    if !blocked.is_empty() {
        return Ok(SanityVerdict::deny(
            Severity::HardBlock,
            blocked.iter().map(|r| r.to_string()).collect(),
            seq,
        ));
    }

    let inputs = MultiplierInputs::from_optional(
        candidate.pf_local.or_else(|| state.and_then(|s| s.pf_7d)),
        candidate.drawdown,
        candidate.edge,
        candidate.volatility,
        candidate.confidence,
    );

    if inputs.pf_local < config.hard_block_pf {
        return Ok(SanityVerdict::deny(
            Severity::HardBlock,
            vec![format!(
                "pf_local {:.3} < hard floor {:.2}",
                inputs.pf_local, config.hard_block_pf
            )],
            seq,
        ));
    }

    if let Some(strength) = candidate.regime_strength {
        if strength <= config.regime_block_strength
            && candidate.weighted_sample >= config.regime_min_weighted_sample
        {
            return Ok(SanityVerdict::deny(
                Severity::HardBlock,
                vec![format!(
                    "regime strength {:.3} <= {:.2} over weighted sample {:.1}",
                    strength, config.regime_block_strength, candidate.weighted_sample
                )],
                seq,
            ));
        }
    }

    // Missing confidence fails the blind-spot check
    if candidate.blind_spot {
        let detail = match candidate.confidence {
            Some(c) if c >= config.blind_spot_min_confidence => None,
            Some(c) => Some(format!("{:.2}", c)),
            None => Some("unknown".to_string()),
        };
        if let Some(confidence) = detail {
            return Ok(SanityVerdict::deny(
                Severity::Warn,
                vec![format!(
                    "blind spot with confidence {} < {:.2}",
                    confidence, config.blind_spot_min_confidence
                )],
                seq,
            ));
        }
    }

    let mut mult = inputs.multiplier();
    if let Some(state) = state {
        // Lanes opened only by the grant trade under the grant's safe cap
        if let Some(grant) = state.active_grant(now) {
            if !LaneAllowances::for_tier(state.tier).allows(lane) {
                mult = mult.min(grant.risk_mult_cap);
            }
        }
    }

    if inputs.pf_local < config.comfort_pf {
        return Ok(SanityVerdict::allow(
            Severity::Warn,
            vec![format!(
                "pf_local {:.3} < comfort floor {:.2}",
                inputs.pf_local, config.comfort_pf
            )],
            mult,
            seq,
        ));
    }

    Ok(SanityVerdict::allow(Severity::Ok, Vec::new(), mult, seq))
}
