//! Durable gate state.
//!
//! A tick commits in two steps: audit records are appended first, then the
//! checkpoint is replaced atomically. The checkpoint's `tick_seq` is the
//! commit marker. Audit entries tagged with a later sequence belong to a tick
//! whose checkpoint never landed and are pruned on load.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::audit_log::{read_optional, write_atomic, AuditEntry, AuditLog};
use super::retry::RetryPolicy;
use crate::domain::{
    CapitalModeState, ProcessingCursor, PromotionRecord, RollbackRecord, SymbolState,
};
use crate::error::{GateError, Result};

pub const CHECKPOINT_VERSION: u32 = 1;
pub const CHECKPOINT_FILE: &str = "gate_state.json";
pub const PROMOTIONS_FILE: &str = "promotions.jsonl";
pub const ROLLBACKS_FILE: &str = "rollbacks.jsonl";

/// Everything needed to resume after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheckpoint {
    pub version: u32,
    pub tick_seq: u64,
    pub committed_at: DateTime<Utc>,
    pub symbols: Vec<SymbolState>,
    pub capital: CapitalModeState,
    pub cursor: ProcessingCursor,
}

/// One tick's worth of durable output
#[derive(Debug, Clone, PartialEq)]
pub struct TickCommit {
    pub checkpoint: GateCheckpoint,
    pub promotions: Vec<PromotionRecord>,
    pub rollbacks: Vec<RollbackRecord>,
}

impl TickCommit {
    pub fn tick_seq(&self) -> u64 {
        self.checkpoint.tick_seq
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Latest committed checkpoint, or `None` on first start
    async fn load(&self) -> Result<Option<GateCheckpoint>>;

    /// Persist a tick. Either the whole tick is visible after restart or none of it.
    async fn commit(&self, commit: &TickCommit) -> Result<()>;
}

/// JSON checkpoint plus JSON-lines audit logs in one directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
    promotions: AuditLog,
    rollbacks: AuditLog,
    retry: RetryPolicy,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        let dir = dir.into();
        Self {
            promotions: AuditLog::new(dir.join(PROMOTIONS_FILE)),
            rollbacks: AuditLog::new(dir.join(ROLLBACKS_FILE)),
            dir,
            retry,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    pub async fn promotion_log(&self, committed_seq: u64) -> Result<Vec<AuditEntry<PromotionRecord>>> {
        self.promotions.read_committed(committed_seq).await
    }

    pub async fn rollback_log(&self, committed_seq: u64) -> Result<Vec<AuditEntry<RollbackRecord>>> {
        self.rollbacks.read_committed(committed_seq).await
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            GateError::Persistence(format!("create {}: {}", self.dir.display(), e))
        })
    }

    async fn read_checkpoint(&self) -> Result<Option<GateCheckpoint>> {
        let path = self.checkpoint_path();
        let Some(text) = read_optional(&path).await? else {
            return Ok(None);
        };

        let checkpoint: GateCheckpoint = serde_json::from_str(&text).map_err(|e| {
            GateError::Persistence(format!("corrupt checkpoint {}: {}", path.display(), e))
        })?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(GateError::Persistence(format!(
                "checkpoint version {} is not supported (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        Ok(Some(checkpoint))
    }

    async fn write_once(&self, commit: &TickCommit) -> Result<()> {
        self.ensure_dir().await?;
        let seq = commit.tick_seq();
        self.promotions.append(seq, &commit.promotions).await?;
        self.rollbacks.append(seq, &commit.rollbacks).await?;

        let bytes = serde_json::to_vec_pretty(&commit.checkpoint)?;
        write_atomic(&self.checkpoint_path(), &bytes).await
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<GateCheckpoint>> {
        let checkpoint = self
            .retry
            .run("load checkpoint", move || self.read_checkpoint())
            .await?;

        let committed = checkpoint.as_ref().map(|c| c.tick_seq).unwrap_or(0);
        let dropped = self.promotions.prune_uncommitted(committed).await?
            + self.rollbacks.prune_uncommitted(committed).await?;
        if dropped > 0 {
            warn!(committed, dropped, "discarded audit records from an interrupted tick");
        }

        match &checkpoint {
            Some(c) => info!(
                tick_seq = c.tick_seq,
                symbols = c.symbols.len(),
                mode = %c.capital.mode,
                "loaded gate checkpoint"
            ),
            None => info!(dir = %self.dir.display(), "no checkpoint found, starting fresh"),
        }
        Ok(checkpoint)
    }

    async fn commit(&self, commit: &TickCommit) -> Result<()> {
        let seq = commit.tick_seq();
        // A failed attempt may leave audit lines behind; drop them before retrying
        // so the retry does not duplicate records.
        let committed_before = seq.saturating_sub(1);
        self.retry
            .run("commit tick", move || async move {
                self.promotions.prune_uncommitted(committed_before).await?;
                self.rollbacks.prune_uncommitted(committed_before).await?;
                self.write_once(commit).await
            })
            .await?;

        debug!(
            tick_seq = seq,
            promotions = commit.promotions.len(),
            rollbacks = commit.rollbacks.len(),
            "tick committed"
        );
        Ok(())
    }
}
