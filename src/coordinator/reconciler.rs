//! Reconciler — the periodic tick loop
//!
//! Each tick runs, strictly in order:
//!   1. capital-mode gate over the latest metrics
//!   2. unseen operator commands (manual halt, quarantine holds)
//!   3. per-symbol metrics folded into the ledger
//!   4. promotion engine over unseen proposals
//!   5. rollback engine over enabled grants
//!   6. ledger recompute and invariant validation
//!
//! The tick works on a clone of the committed state. Only after the commit
//! lands is the clone adopted and a new snapshot published; any error or a
//! budget overrun leaves the previous snapshot in force.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::state::GateState;
use crate::config::AppConfig;
use crate::domain::{CapitalMode, ModeTransition, PromotionRecord, RollbackRecord};
use crate::engine::{
    apply_operator_commands, OperatorOutcome, PromotionEngine, ProposalOutcome, RollbackEngine,
};
use crate::error::{GateError, Result};
use crate::ledger::SnapshotPublisher;
use crate::persistence::{InputReader, StateStore, TickCommit};

/// Summary of one committed tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_seq: u64,
    pub as_of: DateTime<Utc>,
    pub mode: CapitalMode,
    pub transition: Option<ModeTransition>,
    pub operator: Vec<(u64, OperatorOutcome)>,
    pub proposals: Vec<(u64, ProposalOutcome)>,
    pub promotions: Vec<PromotionRecord>,
    pub rollbacks: Vec<RollbackRecord>,
    pub symbols: usize,
}

pub struct Reconciler {
    config: AppConfig,
    store: Arc<dyn StateStore>,
    reader: InputReader,
    promotion: PromotionEngine,
    rollback: RollbackEngine,
    state: GateState,
    publisher: SnapshotPublisher,
}

impl Reconciler {
    pub fn new(config: AppConfig, store: Arc<dyn StateStore>, reader: InputReader) -> Self {
        Self {
            promotion: PromotionEngine::new(config.promotion.clone()),
            rollback: RollbackEngine::new(config.rollback.clone()),
            state: GateState::new(&config),
            publisher: SnapshotPublisher::new(),
            config,
            store,
            reader,
        }
    }

    /// Handle for sanity checks; always reflects the last committed tick
    pub fn publisher(&self) -> SnapshotPublisher {
        self.publisher.clone()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Load the last checkpoint (if any) and publish it
    pub async fn restore(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let Some(checkpoint) = self.store.load().await? {
            self.state = GateState::from_checkpoint(&self.config, checkpoint, now);
        }
        self.publisher.publish(self.state.snapshot(now))?;
        info!(
            tick_seq = self.state.tick_seq,
            mode = %self.state.capital.mode(),
            symbols = self.state.ledger.len(),
            next_line = self.state.cursor.next_line(),
            "reconciler restored"
        );
        Ok(())
    }

    /// Run one tick. Nothing is committed or published unless every step succeeds.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let budget_ms = self.config.reconcile.tick_budget_ms;
        let budget = Duration::from_millis(budget_ms);
        let started = Instant::now();
        // The timeout only fires at await points, hence the elapsed check below
        let computed = tokio::time::timeout(budget, self.compute(now)).await;

        let (next, commit, report) = match computed {
            Ok(Ok(result)) if started.elapsed() <= budget => result,
            Ok(Err(e)) => {
                log_abort(&e, self.state.tick_seq + 1);
                return Err(e);
            }
            Ok(Ok(_)) | Err(_) => {
                let e = GateError::TickBudgetExceeded { budget_ms };
                log_abort(&e, self.state.tick_seq + 1);
                return Err(e);
            }
        };

        if let Err(e) = self.store.commit(&commit).await {
            log_abort(&e, report.tick_seq);
            return Err(e);
        }

        self.state = next;
        self.publisher.publish(self.state.snapshot(now))?;

        info!(
            tick_seq = report.tick_seq,
            mode = %report.mode,
            promotions = report.promotions.len(),
            rollbacks = report.rollbacks.len(),
            symbols = report.symbols,
            "tick committed"
        );
        Ok(report)
    }

    async fn compute(&self, now: DateTime<Utc>) -> Result<(GateState, TickCommit, TickReport)> {
        let mut next = self.state.clone();

        let metrics = self.reader.read_metrics().await?;
        let proposals = self.reader.read_proposals(next.cursor.next_line()).await?;
        let commands = self
            .reader
            .read_operator_commands(next.cursor.next_operator_line())
            .await?;
        let since = now - ChronoDuration::hours(self.config.rollback.lookback_hours);
        let trades = self.reader.read_trades(since).await?;

        let mut transition = next.capital.tick(metrics.as_ref(), now);

        let operator = apply_operator_commands(
            &commands,
            &mut next.cursor,
            &mut next.capital,
            &mut next.ledger,
            now,
        );
        if let Some(halt) = operator.iter().rev().find_map(|(_, o)| match o {
            OperatorOutcome::Halted { transition } => transition.clone(),
            _ => None,
        }) {
            transition = Some(halt);
        }

        if let Some(metrics) = &metrics {
            for row in &metrics.symbols {
                next.ledger.apply_metrics(row, now);
            }
        }

        let pass = self.promotion.process(
            &proposals,
            &mut next.cursor,
            next.capital.state(),
            &mut next.ledger,
            now,
        );

        let rollbacks = self.rollback.run(&mut next.ledger, &trades, now);

        next.ledger.recompute_all(now);
        next.ledger.validate_invariants(now)?;

        next.tick_seq += 1;
        debug!(
            tick_seq = next.tick_seq,
            proposals = proposals.len(),
            trades = trades.len(),
            "tick computed"
        );

        let commit = TickCommit {
            checkpoint: next.to_checkpoint(now),
            promotions: pass.applied.clone(),
            rollbacks: rollbacks.clone(),
        };
        let report = TickReport {
            tick_seq: next.tick_seq,
            as_of: now,
            mode: next.capital.mode(),
            transition,
            operator,
            proposals: pass.outcomes,
            promotions: pass.applied,
            rollbacks,
            symbols: next.ledger.len(),
        };
        Ok((next, commit, report))
    }

    /// Tick on an interval until shutdown. Returns early only on a fatal error.
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let period = Duration::from_secs(self.config.reconcile.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        // A slow tick must not cause a burst of catch-up ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = period.as_secs(), "reconciler starting main loop");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        if e.is_fatal() {
                            error!(error = %e, "reconciler stopping: ledger can no longer be trusted");
                            return Err(e);
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!(tick_seq = self.state.tick_seq, "reconciler: shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn log_abort(e: &GateError, tick_seq: u64) {
    if e.is_persistence() || e.is_fatal() {
        error!(tick_seq, error = %e, "tick aborted, previous snapshot stays in force");
    } else {
        warn!(tick_seq, error = %e, "tick skipped, previous snapshot stays in force");
    }
}
