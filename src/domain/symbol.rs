use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::grant::PromotionGrant;

/// Advisory strength classification, owned by the reflection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Tier1,
    Tier2,
    Tier3,
}

impl Default for Tier {
    fn default() -> Self {
        // Unknown symbols start with the least privilege
        Tier::Tier3
    }
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trading mode with its own admission flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Core,
    Exploration,
    Recovery,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Core, Lane::Exploration, Lane::Recovery];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Core => "core",
            Lane::Exploration => "exploration",
            Lane::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(Lane::Core),
            "exploration" => Ok(Lane::Exploration),
            "recovery" => Ok(Lane::Recovery),
            other => Err(format!("unknown lane: {other}")),
        }
    }
}

/// Per-symbol admission state
///
/// Only [`crate::ledger::SymbolLedger`] mutates these records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolState {
    pub symbol: String,
    pub tier: Tier,
    pub allow_core: bool,
    pub allow_exploration: bool,
    pub allow_recovery: bool,
    pub quarantined: bool,
    pub quarantine_reason: Option<String>,
    /// Operator hold; survives metrics rows that report the symbol clean
    #[serde(default)]
    pub operator_quarantine: Option<String>,
    pub pf_7d: Option<f64>,
    pub closes_7d: u32,
    pub promotion: Option<PromotionGrant>,
}

impl SymbolState {
    /// Least-privilege record for a symbol seen for the first time
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tier: Tier::default(),
            allow_core: false,
            allow_exploration: false,
            allow_recovery: false,
            quarantined: false,
            quarantine_reason: None,
            operator_quarantine: None,
            pf_7d: None,
            closes_7d: 0,
            promotion: None,
        }
    }

    pub fn allows(&self, lane: Lane) -> bool {
        match lane {
            Lane::Core => self.allow_core,
            Lane::Exploration => self.allow_exploration,
            Lane::Recovery => self.allow_recovery,
        }
    }

    /// The grant, only if it is enabled and unexpired at `now`
    pub fn active_grant(&self, now: DateTime<Utc>) -> Option<&PromotionGrant> {
        self.promotion.as_ref().filter(|g| g.is_active(now))
    }

    pub fn any_lane_open(&self) -> bool {
        self.allow_core || self.allow_exploration || self.allow_recovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_symbol_is_least_privilege() {
        let state = SymbolState::new("BTC");
        assert_eq!(state.tier, Tier::Tier3);
        assert!(!state.any_lane_open());
        assert!(state.promotion.is_none());
    }

    #[test]
    fn lane_parses_case_insensitively() {
        assert_eq!("Core".parse::<Lane>().unwrap(), Lane::Core);
        assert_eq!(" recovery ".parse::<Lane>().unwrap(), Lane::Recovery);
        assert!("scalp".parse::<Lane>().is_err());
    }

    #[test]
    fn tier_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Tier::Tier2).unwrap(), "\"tier2\"");
    }
}
