use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use ploy_gate::cli::output::{self, OutputMode};
use ploy_gate::cli::status::{gate_rows, symbol_rows};
use ploy_gate::cli::{Cli, Commands};
use ploy_gate::config::AppConfig;
use ploy_gate::coordinator::{GateState, Reconciler};
use ploy_gate::domain::OperatorCommand;
use ploy_gate::persistence::{FileStateStore, InputReader, OperatorQueue, RetryPolicy, StateStore};
use ploy_gate::risk::compute_multiplier;
use ploy_gate::safety::{self, TradeCandidate};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

mod main_runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Multiplier {
        pf_local,
        drawdown,
        edge,
        volatility,
        confidence,
    } = cli.command
    {
        let mult = compute_multiplier(pf_local, drawdown, edge, volatility, confidence);
        println!("{mult:.4}");
        return Ok(());
    }

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    config.validate()?;
    let _log_guard = main_runtime::init_logging(&config.logging);

    let retry = RetryPolicy::from_config(&config.reconcile);

    if let Some(action) = cli.command.operator_action() {
        let queue = OperatorQueue::new(&config.paths, retry);
        queue.push(&OperatorCommand::new(action, Utc::now())).await?;
        info!(path = %config.paths.operator_path.display(), "operator command queued");
        println!("queued; applied on the next tick");
        return Ok(());
    }

    let store = Arc::new(FileStateStore::new(config.paths.state_dir.clone(), retry.clone()));
    let reader = InputReader::new(&config.paths, retry);

    match cli.command {
        Commands::Run => run_loop(config, store, reader).await?,
        Commands::Tick { json } => {
            let mut reconciler = Reconciler::new(config, store, reader);
            let now = Utc::now();
            reconciler.restore(now).await?;
            let report = reconciler.tick(now).await?;
            if json {
                output::print_item(&report)?;
            } else {
                output::print_kv("tick", &report.tick_seq.to_string());
                output::print_kv("mode", report.mode.as_str());
                if let Some(t) = &report.transition {
                    output::print_kv("transition", &format!("{} -> {} ({})", t.from, t.to, t.reason));
                }
                for (line, outcome) in &report.operator {
                    output::print_kv(&format!("operator[{line}]"), &outcome.to_string());
                }
                for (line, outcome) in &report.proposals {
                    output::print_kv(&format!("proposal[{line}]"), &outcome.to_string());
                }
                for rollback in &report.rollbacks {
                    output::print_kv(&format!("rollback {}", rollback.symbol), &rollback.reason);
                }
            }
        }
        Commands::Status { json } => {
            let now = Utc::now();
            let state = load_state(&config, store.as_ref(), now).await?;
            let mode = OutputMode::from_json_flag(json);
            let capital = state.capital.state();
            if mode == OutputMode::Table {
                output::print_kv("tick", &state.tick_seq.to_string());
                output::print_kv("capital mode", capital.mode.as_str());
                output::print_kv(
                    "hysteresis",
                    &format!(
                        "{}/{}",
                        capital.hysteresis.ok_ticks, capital.hysteresis.needed_ok_ticks
                    ),
                );
                output::print_kv("next proposal line", &state.cursor.next_line().to_string());
                let promotions = store.promotion_log(state.tick_seq).await?;
                let rollbacks = store.rollback_log(state.tick_seq).await?;
                output::print_kv("promotions logged", &promotions.len().to_string());
                output::print_kv("rollbacks logged", &rollbacks.len().to_string());
            }
            output::print_items(&gate_rows(capital), mode)?;
            output::print_items(&symbol_rows(&state.ledger, now), mode)?;
        }
        Commands::Check(args) => {
            let now = Utc::now();
            let state = load_state(&config, store.as_ref(), now).await?;
            let candidate = TradeCandidate::from(args);
            let verdict = safety::evaluate(&config.sanity, &state.snapshot(now), &candidate, now)?;
            output::print_item(&verdict)?;
        }
        Commands::Multiplier { .. }
        | Commands::Halt { .. }
        | Commands::Quarantine { .. }
        | Commands::Release { .. } => {}
    }

    Ok(())
}

async fn load_state(
    config: &AppConfig,
    store: &FileStateStore,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<GateState> {
    Ok(match store.load().await? {
        Some(checkpoint) => GateState::from_checkpoint(config, checkpoint, now),
        None => GateState::new(config),
    })
}

async fn run_loop(
    config: AppConfig,
    store: Arc<FileStateStore>,
    reader: InputReader,
) -> anyhow::Result<()> {
    let mut reconciler = Reconciler::new(config, store, reader);
    reconciler.restore(Utc::now()).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Ctrl-C received, finishing current tick");
        let _ = shutdown_tx.send(());
    });

    reconciler.run(shutdown_rx).await?;
    info!("reconciler stopped");
    Ok(())
}
