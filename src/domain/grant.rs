use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Time-bounded, capped elevation of a symbol's privileges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionGrant {
    pub symbol: String,
    pub source: String,
    pub applied_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub risk_mult_cap: f64,
    pub max_positions: u32,
    pub enabled: bool,
}

impl PromotionGrant {
    pub fn new(
        symbol: impl Into<String>,
        source: impl Into<String>,
        applied_at: DateTime<Utc>,
        ttl: Duration,
        risk_mult_cap: f64,
        max_positions: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            source: source.into(),
            applied_at,
            expires_at: applied_at + ttl,
            risk_mult_cap,
            max_positions,
            enabled: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Enabled and not past its TTL
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_expired(now)
    }

    /// Disabling is one-way; a new grant must come from a fresh proposal
    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

/// Audit entry written when a grant is applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub source: String,
    pub rationale: String,
    pub proposal_line: u64,
    pub expires_at: DateTime<Utc>,
    pub risk_mult_cap: f64,
    pub max_positions: u32,
}

/// Immutable audit entry written when a grant is revoked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    /// `None` when the window had no data or no losses (PF undefined or infinite)
    pub pf_24h: Option<f64>,
    pub loss_share: Option<f64>,
    pub loss_streak: u32,
    pub wins: u32,
    pub losses: u32,
    pub reason: String,
    /// `applied_at` of the revoked grant, identifying the grant instance
    pub grant_applied_at: DateTime<Utc>,
}
