use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{GateError, Result};

/// Main configuration structure
///
/// Every section falls back to the reference policy, so an empty config directory
/// yields a usable gate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub capital_mode: CapitalModeConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub sanity: SanityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the checkpoint and audit logs
    pub state_dir: PathBuf,
    /// Rolling metrics snapshot produced by the analytics pipeline
    pub metrics_path: PathBuf,
    /// Append-only promotion proposal stream (JSON lines)
    pub proposals_path: PathBuf,
    /// Append-only trade close stream (JSON lines)
    pub trades_path: PathBuf,
    /// Operator override stream written by the CLI (JSON lines)
    pub operator_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("data/state"),
            metrics_path: PathBuf::from("data/metrics.json"),
            proposals_path: PathBuf::from("data/proposals.jsonl"),
            trades_path: PathBuf::from("data/trades.jsonl"),
            operator_path: PathBuf::from("data/operator.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between reconciliation ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// A tick whose compute phase runs longer than this is skipped entirely.
    /// The timeout fires at I/O await points; the engine passes after the
    /// reads are synchronous and are checked against the budget only once done.
    #[serde(default = "default_tick_budget_ms")]
    pub tick_budget_ms: u64,
    /// Attempts per I/O operation before the tick aborts
    #[serde(default = "default_io_retries")]
    pub io_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_tick_budget_ms() -> u64 {
    10_000
}

fn default_io_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    100
}

fn default_retry_max_ms() -> u64 {
    2_000
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            tick_budget_ms: default_tick_budget_ms(),
            io_retries: default_io_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapitalModeConfig {
    /// Consecutive fully-passing ticks before the mode may relax one step (0 = immediate)
    pub needed_ok_ticks: u32,
    /// Portfolio 7d PF below this puts the book in de_risk
    pub pf7d_floor: f64,
    /// Portfolio 7d PF below this halts new entries
    pub pf7d_halt_floor: f64,
    /// Drawdown above this puts the book in de_risk
    pub max_drawdown: f64,
    /// Drawdown above this halts new entries
    pub halt_drawdown: f64,
    /// Metrics older than this are treated as stale
    pub metrics_max_age_secs: u64,
    /// Bounded transition history kept for audit
    pub history_limit: usize,
}

impl Default for CapitalModeConfig {
    fn default() -> Self {
        Self {
            needed_ok_ticks: 3,
            pf7d_floor: 1.0,
            pf7d_halt_floor: 0.85,
            max_drawdown: 0.15,
            halt_drawdown: 0.25,
            metrics_max_age_secs: 900,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// At most one grant is applied globally per cooldown window
    pub cooldown_secs: i64,
    pub ttl_hours: i64,
    /// Safe cap on the risk multiplier while trading on a grant
    pub risk_mult_cap: f64,
    /// Safe cap on concurrent positions while trading on a grant
    pub max_positions: u32,
    /// Proposals older than this are consumed without applying
    pub proposal_max_age_hours: i64,
    /// Source tag recorded on every grant
    pub source: String,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3_600,
            ttl_hours: 48,
            risk_mult_cap: 0.5,
            max_positions: 1,
            proposal_max_age_hours: 24,
            source: "proposal_stream".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    pub lookback_hours: i64,
    pub pf_floor: f64,
    pub max_loss_share: f64,
    pub max_loss_streak: u32,
    /// Performance rules are skipped below this many closes in the window
    pub min_trades: usize,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            pf_floor: 0.95,
            max_loss_share: 0.50,
            max_loss_streak: 3,
            min_trades: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Maximum concurrent positions across the book
    pub max_global_positions: u32,
    /// Maximum positions per symbol when no grant is active
    pub max_positions_per_symbol: u32,
    /// A granted symbol may bypass de_risk only with pf_7d at or above this
    pub bypass_pf_floor: f64,
    /// ...and with at least this many closes backing the pf_7d figure
    pub bypass_min_closes: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_global_positions: 5,
            max_positions_per_symbol: 1,
            bypass_pf_floor: 1.0,
            bypass_min_closes: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SanityConfig {
    pub hard_block_pf: f64,
    pub comfort_pf: f64,
    /// Regime strength at or below this is "very negative"
    pub regime_block_strength: f64,
    pub regime_min_weighted_sample: f64,
    pub blind_spot_min_confidence: f64,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            hard_block_pf: 0.85,
            comfort_pf: 0.95,
            regime_block_strength: -0.5,
            regime_min_weighted_sample: 20.0,
            blind_spot_min_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file (console only when unset)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("PLOY_GATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (PLOY_GATE__PROMOTION__COOLDOWN_SECS, etc.)
            .add_source(
                Environment::with_prefix("PLOY_GATE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Reject values that would make the gate meaningless
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.promotion.ttl_hours <= 0 {
            problems.push(format!("promotion.ttl_hours {} <= 0", self.promotion.ttl_hours));
        }
        if self.promotion.cooldown_secs < 0 {
            problems.push(format!(
                "promotion.cooldown_secs {} < 0",
                self.promotion.cooldown_secs
            ));
        }
        if !(self.promotion.risk_mult_cap > 0.0) {
            problems.push(format!(
                "promotion.risk_mult_cap {} must be positive",
                self.promotion.risk_mult_cap
            ));
        }
        if self.rollback.lookback_hours <= 0 {
            problems.push(format!(
                "rollback.lookback_hours {} <= 0",
                self.rollback.lookback_hours
            ));
        }
        if !(0.0..=1.0).contains(&self.rollback.max_loss_share) {
            problems.push(format!(
                "rollback.max_loss_share {} outside [0, 1]",
                self.rollback.max_loss_share
            ));
        }
        if self.sanity.comfort_pf < self.sanity.hard_block_pf {
            problems.push(format!(
                "sanity.comfort_pf {} < sanity.hard_block_pf {}",
                self.sanity.comfort_pf, self.sanity.hard_block_pf
            ));
        }
        if self.capital_mode.pf7d_halt_floor > self.capital_mode.pf7d_floor {
            problems.push(format!(
                "capital_mode.pf7d_halt_floor {} > capital_mode.pf7d_floor {}",
                self.capital_mode.pf7d_halt_floor, self.capital_mode.pf7d_floor
            ));
        }
        if self.capital_mode.halt_drawdown < self.capital_mode.max_drawdown {
            problems.push(format!(
                "capital_mode.halt_drawdown {} < capital_mode.max_drawdown {}",
                self.capital_mode.halt_drawdown, self.capital_mode.max_drawdown
            ));
        }
        if self.reconcile.interval_secs == 0 {
            problems.push("reconcile.interval_secs must be > 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GateError::InvalidConfig(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.promotion.cooldown_secs, 3_600);
        assert_eq!(cfg.promotion.ttl_hours, 48);
        assert_eq!(cfg.rollback.lookback_hours, 24);
        assert_eq!(cfg.rollback.max_loss_streak, 3);
        assert_eq!(cfg.sanity.hard_block_pf, 0.85);
        assert_eq!(cfg.sanity.comfort_pf, 0.95);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut cfg = AppConfig::default();
        cfg.promotion.ttl_hours = 0;
        cfg.sanity.comfort_pf = 0.5;

        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("ttl_hours"), "{err}");
        assert!(err.contains("comfort_pf"), "{err}");
    }

    #[test]
    fn load_from_missing_dir_uses_defaults() {
        let dir = std::env::temp_dir().join(format!("ploy-gate-cfg-{}", uuid::Uuid::new_v4()));
        let cfg = AppConfig::load_from(&dir).unwrap();
        assert_eq!(cfg.capital_mode.needed_ok_ticks, 3);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn load_from_reads_default_toml() {
        let dir = std::env::temp_dir().join(format!("ploy-gate-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("default.toml"),
            "[promotion]\ncooldown_secs = 120\n\n[capital_mode]\nneeded_ok_ticks = 0\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(&dir).unwrap();
        assert_eq!(cfg.promotion.cooldown_secs, 120);
        assert_eq!(cfg.promotion.ttl_hours, 48);
        assert_eq!(cfg.capital_mode.needed_ok_ticks, 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
