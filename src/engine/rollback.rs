//! Rollback Engine
//!
//! Revokes grants whose trailing performance regressed or whose TTL ran out.
//! This is the authoritative write path for expiry.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::stats::WindowStats;
use crate::config::RollbackConfig;
use crate::domain::{PromotionGrant, RollbackRecord, TradeOutcome};
use crate::ledger::SymbolLedger;

#[derive(Debug, Clone)]
pub struct RollbackEngine {
    config: RollbackConfig,
}

impl RollbackEngine {
    pub fn new(config: RollbackConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(RollbackConfig::default())
    }

    /// Scan every enabled grant and revoke the ones that trip a rule.
    /// Running twice on the same data revokes nothing the second time.
    pub fn run(
        &self,
        ledger: &mut SymbolLedger,
        trades: &[TradeOutcome],
        now: DateTime<Utc>,
    ) -> Vec<RollbackRecord> {
        let window_start = now - Duration::hours(self.config.lookback_hours);
        let mut records = Vec::new();

        for grant in ledger.enabled_grants() {
            // Closes from before the grant say nothing about the canary
            let start = window_start.max(grant.applied_at);
            let stats = self.window_stats(&grant.symbol, trades, start, now);
            let reasons = self.triggered_rules(&grant, &stats, now);

            if reasons.is_empty() {
                debug!(
                    symbol = %grant.symbol,
                    trades = stats.trades,
                    pf = ?stats.profit_factor(),
                    "grant holds"
                );
                continue;
            }

            let reason = reasons.join(";");
            if ledger.revoke_grant(&grant.symbol, now).is_none() {
                continue;
            }

            let record = RollbackRecord {
                ts: now,
                symbol: grant.symbol.clone(),
                pf_24h: stats.profit_factor().filter(|pf| pf.is_finite()),
                loss_share: stats.loss_share(),
                loss_streak: stats.max_loss_streak,
                wins: stats.wins,
                losses: stats.losses,
                reason,
                grant_applied_at: grant.applied_at,
            };
            warn!(
                symbol = %record.symbol,
                reason = %record.reason,
                pf_24h = ?record.pf_24h,
                loss_share = ?record.loss_share,
                loss_streak = record.loss_streak,
                "promotion ROLLED BACK"
            );
            records.push(record);
        }

        records
    }

    fn window_stats(
        &self,
        symbol: &str,
        trades: &[TradeOutcome],
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> WindowStats {
        let mut window: Vec<&TradeOutcome> = trades
            .iter()
            .filter(|t| t.symbol == symbol && t.ts > window_start && t.ts <= now)
            .collect();
        window.sort_by_key(|t| t.ts);
        WindowStats::from_returns(window.iter().map(|t| t.ret_pct))
    }

    /// Rule names in evaluation order: PF, loss share, streak, TTL
    fn triggered_rules(
        &self,
        grant: &PromotionGrant,
        stats: &WindowStats,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut reasons = Vec::new();

        if stats.trades > 0 && stats.trades >= self.config.min_trades {
            if let Some(pf) = stats.profit_factor() {
                if pf < self.config.pf_floor {
                    reasons.push(format!("pf_24h<{:.2}", self.config.pf_floor));
                }
            }
            if let Some(share) = stats.loss_share() {
                if share > self.config.max_loss_share {
                    reasons.push(format!("loss_share>{:.2}", self.config.max_loss_share));
                }
            }
            if stats.max_loss_streak >= self.config.max_loss_streak {
                reasons.push(format!("loss_streak>={}", self.config.max_loss_streak));
            }
        }

        if grant.is_expired(now) {
            reasons.push("ttl_expired".to_string());
        }

        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn trade(symbol: &str, minutes_after: i64, ret_pct: f64) -> TradeOutcome {
        TradeOutcome {
            ts: t0() + Duration::minutes(minutes_after),
            symbol: symbol.to_string(),
            ret_pct,
        }
    }

    fn granted(symbol: &str) -> SymbolLedger {
        let mut ledger = SymbolLedger::new(LedgerConfig::default());
        ledger.set_grant(
            PromotionGrant::new(symbol, "test", t0(), Duration::hours(48), 0.5, 1),
            t0(),
        );
        ledger
    }

    #[test]
    fn pf_regression_revokes_with_pf_reason() {
        let mut ledger = granted("Y");
        // PF = 4.0 / 5.0 = 0.80, loss share 0.2, streak 1
        let trades = vec![
            trade("Y", 10, 1.0),
            trade("Y", 20, 1.0),
            trade("Y", 30, -5.0),
            trade("Y", 40, 1.0),
            trade("Y", 50, 1.0),
        ];
        let now = t0() + Duration::hours(2);

        let records = RollbackEngine::with_defaults().run(&mut ledger, &trades, now);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "pf_24h<0.95");
        assert!((records[0].pf_24h.unwrap() - 0.8).abs() < 1e-12);

        let y = ledger.get("Y").unwrap();
        assert!(!y.promotion.as_ref().unwrap().enabled);
        assert!(!y.allow_core);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut ledger = granted("Y");
        let trades = vec![trade("Y", 10, -1.0), trade("Y", 20, -1.0), trade("Y", 30, -1.0)];
        let now = t0() + Duration::hours(1);
        let engine = RollbackEngine::with_defaults();

        let first = engine.run(&mut ledger, &trades, now);
        let after_first = ledger.get("Y").cloned();
        let second = engine.run(&mut ledger, &trades, now);

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].reason, "pf_24h<0.95;loss_share>0.50;loss_streak>=3");
        assert!(first[0].pf_24h.is_some());
        assert!(second.is_empty());
        assert_eq!(ledger.get("Y").cloned(), after_first);
    }

    #[test]
    fn healthy_grant_is_kept() {
        let mut ledger = granted("OK");
        let trades = vec![trade("OK", 5, 1.0), trade("OK", 6, -0.5), trade("OK", 7, 0.8)];
        let records =
            RollbackEngine::with_defaults().run(&mut ledger, &trades, t0() + Duration::hours(1));
        assert!(records.is_empty());
        assert!(ledger.get("OK").unwrap().allow_core);
    }

    #[test]
    fn no_data_only_checks_ttl() {
        let mut ledger = granted("N");
        let engine = RollbackEngine::with_defaults();
        assert!(engine.run(&mut ledger, &[], t0() + Duration::hours(47)).is_empty());

        let records = engine.run(&mut ledger, &[], t0() + Duration::hours(49));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "ttl_expired");
        assert_eq!(records[0].pf_24h, None);
        assert_eq!(records[0].grant_applied_at, t0());
    }

    #[test]
    fn trades_outside_window_or_other_symbols_are_ignored() {
        let mut ledger = granted("W");
        let now = t0() + Duration::hours(30);
        let trades = vec![
            // 30h before `now`, outside the 24h lookback
            trade("W", 0, -3.0),
            trade("OTHER", 29 * 60, -3.0),
            trade("W", 29 * 60, 1.0),
        ];
        assert!(RollbackEngine::with_defaults().run(&mut ledger, &trades, now).is_empty());
    }

    #[test]
    fn streak_uses_chronological_order() {
        let mut ledger = granted("S");
        // Out of order on input; chronologically: -, -, -, +, +, +
        let trades = vec![
            trade("S", 40, 9.0),
            trade("S", 30, -1.0),
            trade("S", 10, -1.0),
            trade("S", 60, 1.0),
            trade("S", 20, -1.0),
            trade("S", 50, 1.0),
        ];
        let records =
            RollbackEngine::with_defaults().run(&mut ledger, &trades, t0() + Duration::hours(1));
        assert_eq!(records[0].reason, "loss_streak>=3");
        assert_eq!(records[0].loss_streak, 3);
    }

    #[test]
    fn closes_before_the_grant_do_not_count() {
        let mut ledger = SymbolLedger::new(LedgerConfig::default());
        let applied_at = t0() + Duration::minutes(1);
        ledger.set_grant(
            PromotionGrant::new("Y", "test", applied_at, Duration::hours(48), 0.5, 1),
            applied_at,
        );
        let trades = vec![
            trade("Y", -120, -1.0),
            trade("Y", -100, -1.0),
            trade("Y", -80, -1.0),
        ];
        let engine = RollbackEngine::with_defaults();

        assert!(engine.run(&mut ledger, &trades, applied_at).is_empty());
        assert!(engine
            .run(&mut ledger, &trades, t0() + Duration::hours(2))
            .is_empty());
        assert!(ledger.get("Y").unwrap().allow_core);

        // A loss after the grant still counts
        let mut trades = trades;
        trades.push(trade("Y", 30, -1.0));
        let records = engine.run(&mut ledger, &trades, t0() + Duration::hours(2));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].losses, 1);
    }

    #[test]
    fn min_trades_guards_performance_rules() {
        let mut ledger = granted("T");
        let engine = RollbackEngine::new(RollbackConfig {
            min_trades: 3,
            ..Default::default()
        });
        let trades = vec![trade("T", 10, -1.0), trade("T", 20, -1.0)];
        assert!(engine.run(&mut ledger, &trades, t0() + Duration::hours(1)).is_empty());
    }
}
