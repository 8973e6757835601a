//! Promotion Engine
//!
//! Walks the proposal stream from the persisted cursor and applies at most one
//! grant per cooldown window. A skip is the steady state, never an error.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::PromotionConfig;
use crate::domain::{
    CapitalMode, CapitalModeState, ProcessingCursor, PromotionGrant, PromotionRecord, Proposal,
};
use crate::ledger::SymbolLedger;

/// One line of the proposal stream, parsed or not
#[derive(Debug, Clone)]
pub struct ProposalLine {
    pub index: u64,
    pub record: Result<Proposal, String>,
}

/// What happened to a single proposal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProposalOutcome {
    Applied { expires_at: DateTime<Utc> },
    Cooldown { remaining_secs: i64 },
    CapitalGate { mode: CapitalMode, detail: String },
    Quarantined,
    AlreadyGranted { expires_at: DateTime<Utc> },
    Stale { age_hours: i64 },
    Malformed { error: String },
}

impl ProposalOutcome {
    /// Cooldown and capital-gate skips are retried on the same line next tick
    pub fn consumes_line(&self) -> bool {
        !matches!(
            self,
            ProposalOutcome::Cooldown { .. } | ProposalOutcome::CapitalGate { .. }
        )
    }
}

impl fmt::Display for ProposalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalOutcome::Applied { expires_at } => {
                write!(f, "applied, expires {}", expires_at.to_rfc3339())
            }
            ProposalOutcome::Cooldown { remaining_secs } => {
                write!(f, "cooldown active, {}s remaining", remaining_secs)
            }
            ProposalOutcome::CapitalGate { mode, detail } => {
                write!(f, "capital gate closed (mode {}): {}", mode, detail)
            }
            ProposalOutcome::Quarantined => write!(f, "symbol quarantined"),
            ProposalOutcome::AlreadyGranted { expires_at } => {
                write!(f, "active grant until {}", expires_at.to_rfc3339())
            }
            ProposalOutcome::Stale { age_hours } => write!(f, "stale proposal ({}h old)", age_hours),
            ProposalOutcome::Malformed { error } => write!(f, "malformed: {}", error),
        }
    }
}

/// Result of one pass over the stream
#[derive(Debug, Clone, Default)]
pub struct PromotionPass {
    pub outcomes: Vec<(u64, ProposalOutcome)>,
    pub applied: Vec<PromotionRecord>,
}

#[derive(Debug, Clone)]
pub struct PromotionEngine {
    config: PromotionConfig,
}

impl PromotionEngine {
    pub fn new(config: PromotionConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(PromotionConfig::default())
    }

    /// Process every unseen line in order, advancing `cursor` past consumed lines.
    /// Stops at the first line that must be retried.
    pub fn process(
        &self,
        lines: &[ProposalLine],
        cursor: &mut ProcessingCursor,
        capital: &CapitalModeState,
        ledger: &mut SymbolLedger,
        now: DateTime<Utc>,
    ) -> PromotionPass {
        let mut pass = PromotionPass::default();
        let start = cursor.next_line();

        for line in lines.iter().filter(|l| l.index >= start) {
            let outcome = self.evaluate(line, cursor, capital, ledger, now);

            if !outcome.consumes_line() {
                debug!(line = line.index, %outcome, "proposal deferred");
                pass.outcomes.push((line.index, outcome));
                break;
            }

            if let (ProposalOutcome::Applied { .. }, Ok(proposal)) = (&outcome, &line.record) {
                let record = self.apply(proposal, line.index, ledger, now);
                cursor.last_applied_at = Some(now);
                pass.applied.push(record);
            } else if matches!(outcome, ProposalOutcome::Malformed { .. }) {
                warn!(line = line.index, %outcome, "skipping proposal");
            } else {
                debug!(line = line.index, %outcome, "proposal consumed without grant");
            }

            cursor.consume(line.index);
            pass.outcomes.push((line.index, outcome));
        }

        pass
    }

    fn evaluate(
        &self,
        line: &ProposalLine,
        cursor: &ProcessingCursor,
        capital: &CapitalModeState,
        ledger: &SymbolLedger,
        now: DateTime<Utc>,
    ) -> ProposalOutcome {
        let proposal = match &line.record {
            Ok(p) => p,
            Err(error) => {
                return ProposalOutcome::Malformed {
                    error: error.clone(),
                }
            }
        };

        let age = now.signed_duration_since(proposal.ts);
        if age > Duration::hours(self.config.proposal_max_age_hours) {
            return ProposalOutcome::Stale {
                age_hours: age.num_hours(),
            };
        }

        if let Some(last) = cursor.last_applied_at {
            let elapsed = now.signed_duration_since(last).num_seconds();
            if elapsed < self.config.cooldown_secs {
                return ProposalOutcome::Cooldown {
                    remaining_secs: self.config.cooldown_secs - elapsed,
                };
            }
        }

        if !capital.admits_promotion() {
            let mut detail = capital.failing_gates().join(", ");
            if detail.is_empty() {
                detail = format!(
                    "hysteresis {}/{}",
                    capital.hysteresis.ok_ticks, capital.hysteresis.needed_ok_ticks
                );
            }
            return ProposalOutcome::CapitalGate {
                mode: capital.mode,
                detail,
            };
        }

        if let Some(state) = ledger.get(&proposal.symbol) {
            if state.quarantined {
                return ProposalOutcome::Quarantined;
            }
            if let Some(grant) = state.active_grant(now) {
                return ProposalOutcome::AlreadyGranted {
                    expires_at: grant.expires_at,
                };
            }
        }

        ProposalOutcome::Applied {
            expires_at: now + Duration::hours(self.config.ttl_hours),
        }
    }

    fn apply(
        &self,
        proposal: &Proposal,
        line: u64,
        ledger: &mut SymbolLedger,
        now: DateTime<Utc>,
    ) -> PromotionRecord {
        let grant = PromotionGrant::new(
            proposal.symbol.clone(),
            self.config.source.clone(),
            now,
            Duration::hours(self.config.ttl_hours),
            self.config.risk_mult_cap,
            self.config.max_positions,
        );
        let record = PromotionRecord {
            ts: now,
            symbol: grant.symbol.clone(),
            source: grant.source.clone(),
            rationale: proposal.rationale.clone(),
            proposal_line: line,
            expires_at: grant.expires_at,
            risk_mult_cap: grant.risk_mult_cap,
            max_positions: grant.max_positions,
        };

        info!(
            symbol = %record.symbol,
            line,
            expires_at = %record.expires_at,
            rationale = %record.rationale,
            "promotion applied"
        );
        ledger.set_grant(grant, now);
        record
    }
}
