use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{CapitalMode, Lane};

/// Open position counts used for slot-capacity checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub global_open: u32,
    pub symbol_open: u32,
}

/// Why a symbol may not open a position in a lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// Never observed; evaluated as a least-privilege record
    UnknownSymbol,
    Quarantined { reason: String },
    LaneNotAllowed { lane: Lane },
    PromotionExpired { expired_at: DateTime<Utc> },
    CapitalMode { mode: CapitalMode, lane: Lane },
    GlobalSlotsFull { limit: u32, open: u32 },
    SymbolSlotsFull { limit: u32, open: u32 },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::UnknownSymbol => write!(f, "symbol has never been observed"),
            BlockReason::Quarantined { reason } => write!(f, "quarantined: {}", reason),
            BlockReason::LaneNotAllowed { lane } => write!(f, "{} lane not allowed", lane),
            BlockReason::PromotionExpired { expired_at } => {
                write!(f, "promotion expired at {}", expired_at.to_rfc3339())
            }
            BlockReason::CapitalMode { mode, lane } => {
                write!(f, "capital mode {} restricts {} lane", mode, lane)
            }
            BlockReason::GlobalSlotsFull { limit, open } => {
                write!(f, "global positions {} >= limit {}", open, limit)
            }
            BlockReason::SymbolSlotsFull { limit, open } => {
                write!(f, "symbol positions {} >= limit {}", open, limit)
            }
        }
    }
}
