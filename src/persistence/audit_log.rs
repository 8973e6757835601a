//! Append-only JSON-lines audit log
//!
//! Each entry is tagged with the tick that produced it. Entries from a tick
//! whose checkpoint never landed are pruned on load.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{GateError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry<T> {
    pub tick_seq: u64,
    #[serde(flatten)]
    pub record: T,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records for one tick and flush them to disk
    pub async fn append<T: Serialize>(&self, tick_seq: u64, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(&AuditEntry { tick_seq, record })?);
            buf.push('\n');
        }

        append_synced(&self.path, buf.as_bytes()).await
    }

    /// Entries up to and including `committed_seq`. Malformed lines are skipped.
    pub async fn read_committed<T: DeserializeOwned>(
        &self,
        committed_seq: u64,
    ) -> Result<Vec<AuditEntry<T>>> {
        let Some(text) = read_optional(&self.path).await? else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry<T>>(line) {
                Ok(entry) if entry.tick_seq <= committed_seq => entries.push(entry),
                Ok(_) => {}
                Err(e) => warn!(path = %self.path.display(), line = i, error = %e, "skipping malformed audit line"),
            }
        }
        Ok(entries)
    }

    /// Drop entries newer than the committed checkpoint
    pub async fn prune_uncommitted(&self, committed_seq: u64) -> Result<usize> {
        let Some(text) = read_optional(&self.path).await? else {
            return Ok(0);
        };

        let mut kept = String::with_capacity(text.len());
        let mut dropped = 0;
        for line in text.lines() {
            let seq = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("tick_seq").and_then(|s| s.as_u64()));
            match seq {
                Some(seq) if seq > committed_seq => dropped += 1,
                _ => {
                    kept.push_str(line);
                    kept.push('\n');
                }
            }
        }

        if dropped > 0 {
            write_atomic(&self.path, kept.as_bytes()).await?;
            info!(
                path = %self.path.display(),
                dropped,
                committed_seq,
                "pruned audit entries from an uncommitted tick"
            );
        }
        Ok(dropped)
    }
}

/// Append `bytes` and flush them to disk
pub(crate) async fn append_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| GateError::Persistence(format!("open {}: {}", path.display(), e)))?;
    file.write_all(bytes)
        .await
        .map_err(|e| GateError::Persistence(format!("append {}: {}", path.display(), e)))?;
    file.sync_data()
        .await
        .map_err(|e| GateError::Persistence(format!("sync {}: {}", path.display(), e)))?;
    Ok(())
}

/// Read a file, treating "not found" as absent
pub(crate) async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GateError::Persistence(format!(
            "read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Write via a temp file and rename, so readers see the old or the new file
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let persist = |what: &str, e: std::io::Error| {
        GateError::Persistence(format!("{} {}: {}", what, tmp.display(), e))
    };

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| persist("create", e))?;
    file.write_all(bytes).await.map_err(|e| persist("write", e))?;
    file.sync_all().await.map_err(|e| persist("sync", e))?;
    drop(file);

    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        GateError::Persistence(format!("rename to {}: {}", path.display(), e))
    })
}
