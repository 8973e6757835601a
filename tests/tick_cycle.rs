//! Full reconciliation ticks against a file-backed store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use ploy_gate::config::{AppConfig, PathsConfig};
use ploy_gate::coordinator::Reconciler;
use ploy_gate::domain::{CapitalMode, Lane};
use ploy_gate::engine::ProposalOutcome;
use ploy_gate::ledger::SlotUsage;
use ploy_gate::persistence::{FileStateStore, InputReader, RetryPolicy};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

struct Workspace {
    dir: PathBuf,
    config: AppConfig,
}

impl Workspace {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("ploy-gate-it-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut config = AppConfig::default();
        config.paths = PathsConfig {
            state_dir: dir.join("state"),
            metrics_path: dir.join("metrics.json"),
            proposals_path: dir.join("proposals.jsonl"),
            trades_path: dir.join("trades.jsonl"),
            operator_path: dir.join("operator.jsonl"),
        };
        config.capital_mode.needed_ok_ticks = 0;
        Self { dir, config }
    }

    fn store(&self) -> Arc<FileStateStore> {
        Arc::new(FileStateStore::new(
            self.config.paths.state_dir.clone(),
            RetryPolicy::immediate(1),
        ))
    }

    async fn reconciler(&self, now: DateTime<Utc>) -> Reconciler {
        let reader = InputReader::new(&self.config.paths, RetryPolicy::immediate(1));
        let mut reconciler = Reconciler::new(self.config.clone(), self.store(), reader);
        reconciler.restore(now).await.unwrap();
        reconciler
    }

    fn write_metrics(&self, generated_at: DateTime<Utc>, pf_7d: f64) {
        let metrics = json!({
            "generated_at": generated_at,
            "portfolio": {"pf_7d": pf_7d, "drawdown": 0.03, "closes_7d": 60},
            "symbols": [
                {"symbol": "X", "tier": "tier2", "pf_7d": 1.10, "closes_7d": 25},
                {"symbol": "Y", "tier": "tier3", "pf_7d": 1.05, "closes_7d": 8}
            ]
        });
        std::fs::write(&self.config.paths.metrics_path, metrics.to_string()).unwrap();
    }

    fn propose(&self, symbol: &str, ts: DateTime<Utc>) {
        append_line(
            &self.config.paths.proposals_path,
            &json!({"symbol": symbol, "rationale": "reflection", "ts": ts}),
        );
    }

    fn trade(&self, symbol: &str, ts: DateTime<Utc>, ret_pct: f64) {
        append_line(
            &self.config.paths.trades_path,
            &json!({"ts": ts, "symbol": symbol, "ret_pct": ret_pct}),
        );
    }

    fn audit_lines(&self, file: &str) -> usize {
        std::fs::read_to_string(self.config.paths.state_dir.join(file))
            .map(|text| text.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn append_line(path: &Path, value: &serde_json::Value) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    writeln!(file, "{}", value).unwrap();
}

#[tokio::test]
async fn canary_is_granted_then_rolled_back_once() {
    let ws = Workspace::new();
    ws.write_metrics(t0(), 1.3);
    ws.propose("Y", t0() - Duration::minutes(10));

    let mut reconciler = ws.reconciler(t0()).await;
    let report = reconciler.tick(t0()).await.unwrap();
    assert_eq!(report.mode, CapitalMode::Normal);
    assert_eq!(report.promotions.len(), 1);
    assert_eq!(report.promotions[0].symbol, "Y");

    let snapshot = reconciler.publisher().latest().unwrap();
    assert!(snapshot
        .is_blocked("Y", Lane::Core, SlotUsage::default(), t0())
        .is_empty());

    // 24h window for Y: PF = 0.8 / 1.0 = 0.80, loss share 0.5, no streak.
    ws.trade("Y", t0() + Duration::minutes(20), 0.4);
    ws.trade("Y", t0() + Duration::minutes(40), -0.5);
    ws.trade("Y", t0() + Duration::minutes(60), 0.4);
    ws.trade("Y", t0() + Duration::minutes(80), -0.5);

    let t1 = t0() + Duration::hours(2);
    ws.write_metrics(t1, 1.3);
    let report = reconciler.tick(t1).await.unwrap();
    assert_eq!(report.rollbacks.len(), 1);
    assert_eq!(report.rollbacks[0].symbol, "Y");
    assert_eq!(report.rollbacks[0].reason, "pf_24h<0.95");

    let snapshot = reconciler.publisher().latest().unwrap();
    let y = snapshot.ledger.view("Y", t1).unwrap();
    assert!(!y.allow_core);
    assert!(y.allow_recovery);

    let t2 = t1 + Duration::minutes(1);
    ws.write_metrics(t2, 1.3);
    let report = reconciler.tick(t2).await.unwrap();
    assert!(report.rollbacks.is_empty());

    assert_eq!(ws.audit_lines("promotions.jsonl"), 1);
    assert_eq!(ws.audit_lines("rollbacks.jsonl"), 1);
}

#[tokio::test]
async fn one_grant_per_cooldown_window() {
    let ws = Workspace::new();
    ws.write_metrics(t0(), 1.3);
    ws.propose("A", t0() - Duration::minutes(5));
    ws.propose("B", t0() - Duration::minutes(4));

    let mut reconciler = ws.reconciler(t0()).await;
    let report = reconciler.tick(t0()).await.unwrap();
    assert_eq!(report.promotions.len(), 1);
    assert_eq!(report.promotions[0].symbol, "A");
    assert!(matches!(
        report.proposals.last(),
        Some((1, ProposalOutcome::Cooldown { .. }))
    ));

    let t1 = t0() + Duration::minutes(30);
    ws.write_metrics(t1, 1.3);
    let report = reconciler.tick(t1).await.unwrap();
    assert!(report.promotions.is_empty());

    let t2 = t0() + Duration::minutes(61);
    ws.write_metrics(t2, 1.3);
    let report = reconciler.tick(t2).await.unwrap();
    assert_eq!(report.promotions.len(), 1);
    assert_eq!(report.promotions[0].symbol, "B");
    assert_eq!(reconciler.state().cursor.next_line(), 2);
}

#[tokio::test]
async fn restart_resumes_from_checkpoint_without_reapplying() {
    let ws = Workspace::new();
    ws.write_metrics(t0(), 1.3);
    ws.propose("Y", t0() - Duration::minutes(10));

    let mut first = ws.reconciler(t0()).await;
    first.tick(t0()).await.unwrap();
    drop(first);

    let t1 = t0() + Duration::hours(3);
    ws.write_metrics(t1, 1.3);
    let mut second = ws.reconciler(t1).await;
    assert_eq!(second.state().tick_seq, 1);
    assert_eq!(second.state().cursor.next_line(), 1);

    let snapshot = second.publisher().latest().unwrap();
    assert!(snapshot.ledger.get("Y").unwrap().promotion.is_some());

    let report = second.tick(t1).await.unwrap();
    assert_eq!(report.tick_seq, 2);
    assert!(report.promotions.is_empty());
    assert_eq!(ws.audit_lines("promotions.jsonl"), 1);
}

#[tokio::test]
async fn expired_grant_closes_core_between_ticks() {
    let ws = Workspace::new();
    ws.write_metrics(t0(), 1.3);
    ws.propose("Y", t0() - Duration::minutes(10));

    let mut reconciler = ws.reconciler(t0()).await;
    reconciler.tick(t0()).await.unwrap();

    let snapshot = reconciler.publisher().latest().unwrap();
    let later = t0() + Duration::hours(49);
    assert!(!snapshot.ledger.view("Y", later).unwrap().allow_core);
    assert!(!snapshot
        .is_blocked("Y", Lane::Core, SlotUsage::default(), later)
        .is_empty());
}

#[tokio::test]
async fn weak_portfolio_de_risks_and_holds_proposals() {
    let ws = Workspace::new();
    ws.write_metrics(t0(), 0.9);
    ws.propose("Y", t0() - Duration::minutes(10));

    let mut reconciler = ws.reconciler(t0()).await;
    let report = reconciler.tick(t0()).await.unwrap();
    assert_eq!(report.mode, CapitalMode::DeRisk);
    assert!(report.transition.is_some());
    assert!(report.promotions.is_empty());
    assert_eq!(reconciler.state().cursor.next_line(), 0);

    let snapshot = reconciler.publisher().latest().unwrap();
    assert!(!snapshot
        .is_blocked("X", Lane::Exploration, SlotUsage::default(), t0())
        .is_empty());
    assert!(snapshot
        .is_blocked("X", Lane::Recovery, SlotUsage::default(), t0())
        .is_empty());

    // Recovery relaxes one step per passing tick; the proposal is applied once normal.
    let t1 = t0() + Duration::minutes(1);
    ws.write_metrics(t1, 1.3);
    let report = reconciler.tick(t1).await.unwrap();
    assert_eq!(report.mode, CapitalMode::Normal);
    assert_eq!(report.promotions.len(), 1);
}
