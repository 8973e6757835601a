use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far the promotion engine has consumed the proposal stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCursor {
    /// Index of the last consumed line; `None` before the first one
    pub last_line_index: Option<u64>,
    /// When the most recent grant was applied (drives the global cooldown)
    pub last_applied_at: Option<DateTime<Utc>>,
    /// Index of the last applied operator command
    #[serde(default)]
    pub last_operator_line: Option<u64>,
}

impl ProcessingCursor {
    /// Index of the next line to examine
    pub fn next_line(&self) -> u64 {
        self.last_line_index.map(|i| i + 1).unwrap_or(0)
    }

    pub fn consume(&mut self, line: u64) {
        self.last_line_index = Some(line);
    }

    pub fn next_operator_line(&self) -> u64 {
        self.last_operator_line.map(|i| i + 1).unwrap_or(0)
    }

    pub fn consume_operator(&mut self, line: u64) {
        self.last_operator_line = Some(line);
    }
}
