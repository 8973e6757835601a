//! Readers for the files other components produce: the metrics snapshot,
//! the proposal stream, the trade log and the operator command stream.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::audit_log::{append_synced, read_optional};
use super::retry::RetryPolicy;
use crate::config::PathsConfig;
use crate::domain::{MetricsSnapshot, OperatorCommand, Proposal, TradeOutcome};
use crate::engine::{OperatorLine, ProposalLine};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct InputReader {
    metrics_path: PathBuf,
    proposals_path: PathBuf,
    trades_path: PathBuf,
    operator_path: PathBuf,
    retry: RetryPolicy,
}

impl InputReader {
    pub fn new(paths: &PathsConfig, retry: RetryPolicy) -> Self {
        Self {
            metrics_path: paths.metrics_path.clone(),
            proposals_path: paths.proposals_path.clone(),
            trades_path: paths.trades_path.clone(),
            operator_path: paths.operator_path.clone(),
            retry,
        }
    }

    /// Latest metrics snapshot. A missing or unparseable file yields `None`,
    /// which the capital gate treats as failing. Invalid symbol rows are dropped.
    pub async fn read_metrics(&self) -> Result<Option<MetricsSnapshot>> {
        let path = &self.metrics_path;
        let text = self
            .retry
            .run("read metrics", move || read_optional(path))
            .await?;
        let Some(text) = text else {
            warn!(path = %path.display(), "metrics snapshot missing");
            return Ok(None);
        };

        let mut snapshot: MetricsSnapshot = match serde_json::from_str(&text) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "metrics snapshot unreadable");
                return Ok(None);
            }
        };

        snapshot.symbols.retain(|row| match row.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "dropping invalid symbol metrics");
                false
            }
        });
        Ok(Some(snapshot))
    }

    /// Proposal lines at or after `from_line`, numbered from zero.
    /// A trailing line without a newline is still being written and is left for later.
    pub async fn read_proposals(&self, from_line: u64) -> Result<Vec<ProposalLine>> {
        let path = &self.proposals_path;
        let text = self
            .retry
            .run("read proposals", move || read_optional(path))
            .await?;
        let Some(text) = text else {
            return Ok(Vec::new());
        };

        let lines = complete_lines(&text);
        let parsed: Vec<ProposalLine> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| (i as u64, line))
            .filter(|(index, _)| *index >= from_line)
            .map(|(index, line)| ProposalLine {
                index,
                record: parse_proposal(line),
            })
            .collect();

        debug!(from_line, pending = parsed.len(), "read proposal stream");
        Ok(parsed)
    }

    /// Trades with `ts > since`. Malformed lines are skipped.
    pub async fn read_trades(&self, since: DateTime<Utc>) -> Result<Vec<TradeOutcome>> {
        let path = &self.trades_path;
        let text = self
            .retry
            .run("read trades", move || read_optional(path))
            .await?;
        let Some(text) = text else {
            return Ok(Vec::new());
        };

        let mut trades = Vec::new();
        for (i, line) in complete_lines(&text).into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let trade = serde_json::from_str::<TradeOutcome>(line)
                .map_err(|e| e.to_string())
                .and_then(|t| t.validate().map(|_| t).map_err(|e| e.to_string()));
            match trade {
                Ok(trade) if trade.ts > since => trades.push(trade),
                Ok(_) => {}
                Err(error) => warn!(line = i, %error, "skipping malformed trade"),
            }
        }
        Ok(trades)
    }

    /// Operator commands at or after `from_line`; same line rules as proposals
    pub async fn read_operator_commands(&self, from_line: u64) -> Result<Vec<OperatorLine>> {
        let path = &self.operator_path;
        let text = self
            .retry
            .run("read operator commands", move || read_optional(path))
            .await?;
        let Some(text) = text else {
            return Ok(Vec::new());
        };

        Ok(complete_lines(&text)
            .into_iter()
            .enumerate()
            .map(|(i, line)| (i as u64, line))
            .filter(|(index, _)| *index >= from_line)
            .map(|(index, line)| OperatorLine {
                index,
                record: parse_operator_command(line),
            })
            .collect())
    }
}

/// Writer side of the operator stream, used by the CLI
#[derive(Debug, Clone)]
pub struct OperatorQueue {
    path: PathBuf,
    retry: RetryPolicy,
}

impl OperatorQueue {
    pub fn new(paths: &PathsConfig, retry: RetryPolicy) -> Self {
        Self {
            path: paths.operator_path.clone(),
            retry,
        }
    }

    /// Append one command; the reconciler applies it on its next tick
    pub async fn push(&self, command: &OperatorCommand) -> Result<()> {
        command.validate()?;
        let mut line = serde_json::to_string(command)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = &self.path;
        let bytes = line.as_bytes();
        self.retry
            .run("append operator command", move || append_synced(path, bytes))
            .await
    }
}

fn complete_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    // The segment after the last newline is either empty or incomplete.
    lines.pop();
    lines
}

fn parse_proposal(line: &str) -> std::result::Result<Proposal, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty line".to_string());
    }
    let proposal: Proposal = serde_json::from_str(line).map_err(|e| e.to_string())?;
    proposal.validate().map_err(|e| e.to_string())?;
    Ok(proposal)
}

fn parse_operator_command(line: &str) -> std::result::Result<OperatorCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("empty line".to_string());
    }
    let command: OperatorCommand = serde_json::from_str(line).map_err(|e| e.to_string())?;
    command.validate().map_err(|e| e.to_string())?;
    Ok(command)
}
