//! Command-line surface for the gate.

pub mod output;
pub mod status;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{Lane, OperatorAction};
use crate::ledger::SlotUsage;
use crate::safety::TradeCandidate;

#[derive(Parser, Debug)]
#[command(name = "ploy-gate")]
#[command(version)]
#[command(about = "Symbol admission control and canary rollout gate", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "PLOY_GATE_CONFIG_DIR")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reconciliation loop until Ctrl-C
    Run,
    /// Run a single reconciliation tick and print its report
    Tick {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show capital mode and per-symbol ledger state
    Status {
        /// Print as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Evaluate one candidate trade against the committed state
    Check(CheckArgs),
    /// Queue a manual halt of new entries; applied on the next tick
    Halt {
        #[arg(long)]
        reason: String,
    },
    /// Queue an operator quarantine that metrics cannot lift
    Quarantine {
        symbol: String,
        #[arg(long)]
        reason: String,
    },
    /// Queue the release of an operator quarantine
    Release { symbol: String },
    /// Compute the risk multiplier for a set of inputs
    Multiplier {
        #[arg(long, default_value = "1.0")]
        pf_local: f64,
        #[arg(long, default_value = "0.0")]
        drawdown: f64,
        #[arg(long, default_value = "0.0")]
        edge: f64,
        #[arg(long, default_value = "0.0")]
        volatility: f64,
        #[arg(long, default_value = "0.5")]
        confidence: f64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    pub symbol: String,
    /// core, exploration or recovery
    #[arg(long, default_value = "core")]
    pub lane: Lane,
    #[arg(long)]
    pub pf_local: Option<f64>,
    #[arg(long)]
    pub drawdown: Option<f64>,
    #[arg(long)]
    pub edge: Option<f64>,
    #[arg(long)]
    pub volatility: Option<f64>,
    #[arg(long)]
    pub confidence: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub regime_strength: Option<f64>,
    #[arg(long, default_value = "0.0")]
    pub weighted_sample: f64,
    #[arg(long)]
    pub blind_spot: bool,
    /// Positions currently open across the portfolio
    #[arg(long, default_value = "0")]
    pub global_open: u32,
    /// Positions currently open on this symbol
    #[arg(long, default_value = "0")]
    pub symbol_open: u32,
}

impl Commands {
    /// The operator override this command queues, if any
    pub fn operator_action(&self) -> Option<OperatorAction> {
        match self {
            Commands::Halt { reason } => Some(OperatorAction::Halt {
                reason: reason.clone(),
            }),
            Commands::Quarantine { symbol, reason } => Some(OperatorAction::Quarantine {
                symbol: symbol.clone(),
                reason: reason.clone(),
            }),
            Commands::Release { symbol } => Some(OperatorAction::Release {
                symbol: symbol.clone(),
            }),
            _ => None,
        }
    }
}

impl From<CheckArgs> for TradeCandidate {
    fn from(args: CheckArgs) -> Self {
        TradeCandidate {
            symbol: args.symbol,
            lane: Some(args.lane),
            pf_local: args.pf_local,
            drawdown: args.drawdown,
            edge: args.edge,
            volatility: args.volatility,
            confidence: args.confidence,
            regime_strength: args.regime_strength,
            weighted_sample: args.weighted_sample,
            blind_spot: args.blind_spot,
            slots: SlotUsage {
                global_open: args.global_open,
                symbol_open: args.symbol_open,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_args_build_a_candidate() {
        let cli = Cli::parse_from([
            "ploy-gate",
            "check",
            "ETH",
            "--lane",
            "exploration",
            "--regime-strength",
            "-0.7",
            "--weighted-sample",
            "25",
            "--symbol-open",
            "1",
        ]);
        let Commands::Check(args) = cli.command else {
            panic!("expected check command");
        };
        let candidate = TradeCandidate::from(args);
        assert_eq!(candidate.symbol, "ETH");
        assert_eq!(candidate.lane, Some(Lane::Exploration));
        assert_eq!(candidate.regime_strength, Some(-0.7));
        assert_eq!(candidate.slots.symbol_open, 1);
        assert_eq!(candidate.slots.global_open, 0);
    }

    #[test]
    fn unknown_lane_is_rejected() {
        assert!(Cli::try_parse_from(["ploy-gate", "check", "ETH", "--lane", "moon"]).is_err());
    }

    #[test]
    fn operator_commands_map_to_actions() {
        let cli = Cli::parse_from(["ploy-gate", "quarantine", "SOL", "--reason", "venue halt"]);
        assert_eq!(
            cli.command.operator_action(),
            Some(OperatorAction::Quarantine {
                symbol: "SOL".into(),
                reason: "venue halt".into()
            })
        );

        let cli = Cli::parse_from(["ploy-gate", "halt", "--reason", "drill"]);
        assert!(matches!(
            cli.command.operator_action(),
            Some(OperatorAction::Halt { .. })
        ));
        assert!(Cli::try_parse_from(["ploy-gate", "halt"]).is_err());

        let cli = Cli::parse_from(["ploy-gate", "status"]);
        assert!(cli.command.operator_action().is_none());
    }
}
