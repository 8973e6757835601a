use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Portfolio-wide risk posture, ordered from least to most restrictive
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CapitalMode {
    #[default]
    Normal,
    DeRisk,
    HaltNewEntries,
}

impl CapitalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapitalMode::Normal => "normal",
            CapitalMode::DeRisk => "de_risk",
            CapitalMode::HaltNewEntries => "halt_new_entries",
        }
    }

    /// One step toward `Normal`
    pub fn relaxed(self) -> Self {
        match self {
            CapitalMode::HaltNewEntries => CapitalMode::DeRisk,
            CapitalMode::DeRisk | CapitalMode::Normal => CapitalMode::Normal,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, CapitalMode::Normal)
    }
}

impl fmt::Display for CapitalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One named safety check evaluated this tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheck {
    pub name: String,
    pub pass: bool,
    /// Mode imposed when this check fails
    pub on_fail: CapitalMode,
    pub detail: String,
}

impl GateCheck {
    pub fn new(name: &str, pass: bool, on_fail: CapitalMode, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            pass,
            on_fail,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hysteresis {
    pub ok_ticks: u32,
    pub needed_ok_ticks: u32,
}

impl Hysteresis {
    pub fn satisfied(&self) -> bool {
        self.ok_ticks >= self.needed_ok_ticks
    }
}

/// Mode transition kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTransition {
    pub ts: DateTime<Utc>,
    pub from: CapitalMode,
    pub to: CapitalMode,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapitalModeState {
    pub mode: CapitalMode,
    pub gates: BTreeMap<String, bool>,
    pub hysteresis: Hysteresis,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<ModeTransition>,
}

impl CapitalModeState {
    pub fn all_gates_pass(&self) -> bool {
        self.gates.values().all(|pass| *pass)
    }

    pub fn failing_gates(&self) -> Vec<&str> {
        self.gates
            .iter()
            .filter(|(_, pass)| !**pass)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Normal mode, every gate green, and hysteresis satisfied
    pub fn admits_promotion(&self) -> bool {
        self.mode.is_normal() && self.all_gates_pass() && self.hysteresis.satisfied()
    }
}
