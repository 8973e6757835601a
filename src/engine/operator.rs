//! Operator overrides
//!
//! Applies the operator command stream from its own cursor. Commands are
//! applied in file order and every line is consumed, malformed or not.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::coordination::CapitalModeGate;
use crate::domain::{ModeTransition, OperatorAction, OperatorCommand, ProcessingCursor};
use crate::ledger::SymbolLedger;

/// One line of the operator stream, parsed or not
#[derive(Debug, Clone)]
pub struct OperatorLine {
    pub index: u64,
    pub record: Result<OperatorCommand, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperatorOutcome {
    Halted { transition: Option<ModeTransition> },
    Quarantined { symbol: String },
    Released { symbol: String },
    NotHeld { symbol: String },
    Malformed { error: String },
}

impl fmt::Display for OperatorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorOutcome::Halted { transition: Some(t) } => {
                write!(f, "halted ({} -> {})", t.from, t.to)
            }
            OperatorOutcome::Halted { transition: None } => write!(f, "already halted"),
            OperatorOutcome::Quarantined { symbol } => write!(f, "{} quarantined", symbol),
            OperatorOutcome::Released { symbol } => write!(f, "{} released", symbol),
            OperatorOutcome::NotHeld { symbol } => write!(f, "{} had no operator hold", symbol),
            OperatorOutcome::Malformed { error } => write!(f, "malformed: {}", error),
        }
    }
}

/// Apply every unseen command. Returns the outcome per line.
pub fn apply_operator_commands(
    lines: &[OperatorLine],
    cursor: &mut ProcessingCursor,
    capital: &mut CapitalModeGate,
    ledger: &mut SymbolLedger,
    now: DateTime<Utc>,
) -> Vec<(u64, OperatorOutcome)> {
    let start = cursor.next_operator_line();
    let mut outcomes = Vec::new();

    for line in lines.iter().filter(|l| l.index >= start) {
        let outcome = match &line.record {
            Err(error) => {
                warn!(line = line.index, %error, "skipping operator command");
                OperatorOutcome::Malformed {
                    error: error.clone(),
                }
            }
            Ok(command) => apply(command, capital, ledger, now),
        };
        if !matches!(outcome, OperatorOutcome::Malformed { .. }) {
            info!(line = line.index, %outcome, "operator command applied");
        }
        cursor.consume_operator(line.index);
        outcomes.push((line.index, outcome));
    }

    outcomes
}

fn apply(
    command: &OperatorCommand,
    capital: &mut CapitalModeGate,
    ledger: &mut SymbolLedger,
    now: DateTime<Utc>,
) -> OperatorOutcome {
    match &command.action {
        OperatorAction::Halt { reason } => OperatorOutcome::Halted {
            transition: capital.manual_halt(reason, now),
        },
        OperatorAction::Quarantine { symbol, reason } => {
            ledger.quarantine(symbol, reason, now);
            OperatorOutcome::Quarantined {
                symbol: symbol.clone(),
            }
        }
        OperatorAction::Release { symbol } => {
            if ledger.release_quarantine(symbol, now) {
                OperatorOutcome::Released {
                    symbol: symbol.clone(),
                }
            } else {
                OperatorOutcome::NotHeld {
                    symbol: symbol.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::domain::CapitalMode;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn line(index: u64, action: OperatorAction) -> OperatorLine {
        OperatorLine {
            index,
            record: Ok(OperatorCommand::new(action, t0())),
        }
    }

    #[test]
    fn commands_apply_in_order_and_advance_cursor() {
        let mut cursor = ProcessingCursor::default();
        let mut capital = CapitalModeGate::with_defaults();
        let mut ledger = SymbolLedger::new(LedgerConfig::default());
        let lines = vec![
            line(
                0,
                OperatorAction::Halt {
                    reason: "drill".into(),
                },
            ),
            OperatorLine {
                index: 1,
                record: Err("bad json".into()),
            },
            line(
                2,
                OperatorAction::Quarantine {
                    symbol: "SOL".into(),
                    reason: "venue halt".into(),
                },
            ),
            line(3, OperatorAction::Release { symbol: "ETH".into() }),
        ];

        let outcomes = apply_operator_commands(&lines, &mut cursor, &mut capital, &mut ledger, t0());

        assert_eq!(outcomes.len(), 4);
        assert!(matches!(
            outcomes[0].1,
            OperatorOutcome::Halted { transition: Some(_) }
        ));
        assert!(matches!(outcomes[1].1, OperatorOutcome::Malformed { .. }));
        assert_eq!(outcomes[3].1, OperatorOutcome::NotHeld { symbol: "ETH".into() });
        assert_eq!(capital.mode(), CapitalMode::HaltNewEntries);
        assert!(ledger.get("SOL").unwrap().quarantined);
        assert_eq!(cursor.next_operator_line(), 4);

        // Nothing new: a second pass is a no-op
        assert!(apply_operator_commands(&lines, &mut cursor, &mut capital, &mut ledger, t0()).is_empty());
    }
}
