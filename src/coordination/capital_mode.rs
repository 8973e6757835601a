//! Capital Mode Gate
//!
//! Hysteresis-gated portfolio posture. Any failing gate restricts the mode within
//! the same tick; relaxing moves one step toward `normal` and only after
//! `needed_ok_ticks` consecutive fully-passing ticks.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::CapitalModeConfig;
use crate::domain::{
    CapitalMode, CapitalModeState, GateCheck, Hysteresis, MetricsSnapshot, ModeTransition,
};

pub const GATE_METRICS_AVAILABLE: &str = "metrics_available";
pub const GATE_METRICS_FRESH: &str = "metrics_fresh";
pub const GATE_PF7D_FLOOR: &str = "pf7d_floor_pass";
pub const GATE_PF7D_HALT_FLOOR: &str = "pf7d_halt_floor_pass";
pub const GATE_DRAWDOWN_FLOOR: &str = "drawdown_floor_pass";
pub const GATE_DRAWDOWN_HALT: &str = "drawdown_halt_pass";

const BUILTIN_GATES: [&str; 6] = [
    GATE_METRICS_AVAILABLE,
    GATE_METRICS_FRESH,
    GATE_PF7D_FLOOR,
    GATE_PF7D_HALT_FLOOR,
    GATE_DRAWDOWN_FLOOR,
    GATE_DRAWDOWN_HALT,
];

/// Global capital mode state machine
#[derive(Debug, Clone)]
pub struct CapitalModeGate {
    config: CapitalModeConfig,
    state: CapitalModeState,
}

impl CapitalModeGate {
    pub fn new(config: CapitalModeConfig) -> Self {
        let state = CapitalModeState {
            hysteresis: Hysteresis {
                ok_ticks: 0,
                needed_ok_ticks: config.needed_ok_ticks,
            },
            ..Default::default()
        };
        Self { config, state }
    }

    /// Resume from a checkpointed state
    pub fn from_state(config: CapitalModeConfig, mut state: CapitalModeState) -> Self {
        state.hysteresis.needed_ok_ticks = config.needed_ok_ticks;
        Self { config, state }
    }

    pub fn with_defaults() -> Self {
        Self::new(CapitalModeConfig::default())
    }

    pub fn state(&self) -> &CapitalModeState {
        &self.state
    }

    pub fn mode(&self) -> CapitalMode {
        self.state.mode
    }

    /// Derive this tick's gate checks from the metrics snapshot
    pub fn build_checks(
        &self,
        metrics: Option<&MetricsSnapshot>,
        now: DateTime<Utc>,
    ) -> Vec<GateCheck> {
        let Some(metrics) = metrics else {
            return vec![GateCheck::new(
                GATE_METRICS_AVAILABLE,
                false,
                CapitalMode::DeRisk,
                "no metrics snapshot",
            )];
        };

        let mut checks = vec![GateCheck::new(
            GATE_METRICS_AVAILABLE,
            true,
            CapitalMode::DeRisk,
            "metrics snapshot loaded",
        )];

        checks.push(match metrics.generated_at {
            Some(ts) => {
                let age = now.signed_duration_since(ts).num_seconds();
                GateCheck::new(
                    GATE_METRICS_FRESH,
                    age <= self.config.metrics_max_age_secs as i64,
                    CapitalMode::DeRisk,
                    format!("age {}s <= {}s", age, self.config.metrics_max_age_secs),
                )
            }
            None => GateCheck::new(
                GATE_METRICS_FRESH,
                false,
                CapitalMode::DeRisk,
                "snapshot has no generated_at",
            ),
        });

        match metrics.portfolio.pf_7d {
            Some(pf) => {
                checks.push(GateCheck::new(
                    GATE_PF7D_FLOOR,
                    pf >= self.config.pf7d_floor,
                    CapitalMode::DeRisk,
                    format!("pf_7d {:.3} >= {:.3}", pf, self.config.pf7d_floor),
                ));
                checks.push(GateCheck::new(
                    GATE_PF7D_HALT_FLOOR,
                    pf >= self.config.pf7d_halt_floor,
                    CapitalMode::HaltNewEntries,
                    format!("pf_7d {:.3} >= {:.3}", pf, self.config.pf7d_halt_floor),
                ));
            }
            None => checks.push(GateCheck::new(
                GATE_PF7D_FLOOR,
                false,
                CapitalMode::DeRisk,
                "pf_7d unavailable",
            )),
        }

        match metrics.portfolio.drawdown {
            Some(dd) => {
                checks.push(GateCheck::new(
                    GATE_DRAWDOWN_FLOOR,
                    dd <= self.config.max_drawdown,
                    CapitalMode::DeRisk,
                    format!("drawdown {:.3} <= {:.3}", dd, self.config.max_drawdown),
                ));
                checks.push(GateCheck::new(
                    GATE_DRAWDOWN_HALT,
                    dd <= self.config.halt_drawdown,
                    CapitalMode::HaltNewEntries,
                    format!("drawdown {:.3} <= {:.3}", dd, self.config.halt_drawdown),
                ));
            }
            None => checks.push(GateCheck::new(
                GATE_DRAWDOWN_FLOOR,
                false,
                CapitalMode::DeRisk,
                "drawdown unavailable",
            )),
        }

        for (name, pass) in &metrics.gates {
            if BUILTIN_GATES.contains(&name.as_str()) {
                warn!(gate = %name, "external gate shadows a built-in gate, ignoring");
                continue;
            }
            checks.push(GateCheck::new(name, *pass, CapitalMode::DeRisk, "external"));
        }

        checks
    }

    /// Apply one tick's checks. Returns the transition, if the mode moved.
    pub fn evaluate(&mut self, checks: &[GateCheck], now: DateTime<Utc>) -> Option<ModeTransition> {
        self.state.gates = checks
            .iter()
            .map(|c| (c.name.clone(), c.pass))
            .collect::<BTreeMap<_, _>>();
        self.state.hysteresis.needed_ok_ticks = self.config.needed_ok_ticks;
        self.state.updated_at = Some(now);

        let failing: Vec<&GateCheck> = checks.iter().filter(|c| !c.pass).collect();

        if let Some(target) = failing.iter().map(|c| c.on_fail).max() {
            self.state.hysteresis.ok_ticks = 0;
            let reason = failing
                .iter()
                .map(|c| format!("{} ({})", c.name, c.detail))
                .collect::<Vec<_>>()
                .join(", ");

            if target > self.state.mode {
                return Some(self.transition(target, reason, now));
            }
            debug!(mode = %self.state.mode, failing = %reason, "capital gates failing, mode held");
            return None;
        }

        self.state.hysteresis.ok_ticks = self.state.hysteresis.ok_ticks.saturating_add(1);

        if !self.state.mode.is_normal() && self.state.hysteresis.satisfied() {
            let reason = format!(
                "{} consecutive passing ticks (needed {})",
                self.state.hysteresis.ok_ticks, self.state.hysteresis.needed_ok_ticks
            );
            let target = self.state.mode.relaxed();
            let transition = self.transition(target, reason, now);
            self.state.hysteresis.ok_ticks = 0;
            return Some(transition);
        }

        debug!(
            mode = %self.state.mode,
            ok_ticks = self.state.hysteresis.ok_ticks,
            needed = self.state.hysteresis.needed_ok_ticks,
            "capital gates passing"
        );
        None
    }

    /// Build checks from metrics and apply them
    pub fn tick(
        &mut self,
        metrics: Option<&MetricsSnapshot>,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        let checks = self.build_checks(metrics, now);
        self.evaluate(&checks, now)
    }

    /// Operator override: halt new entries immediately
    pub fn manual_halt(&mut self, reason: &str, now: DateTime<Utc>) -> Option<ModeTransition> {
        self.state.hysteresis.ok_ticks = 0;
        if self.state.mode == CapitalMode::HaltNewEntries {
            return None;
        }
        Some(self.transition(
            CapitalMode::HaltNewEntries,
            format!("manual: {}", reason),
            now,
        ))
    }

    fn transition(&mut self, to: CapitalMode, reason: String, now: DateTime<Utc>) -> ModeTransition {
        let from = self.state.mode;
        self.state.mode = to;

        if to > from {
            warn!(%from, %to, %reason, "capital mode RESTRICTED");
        } else {
            info!(%from, %to, %reason, "capital mode relaxed");
        }

        let transition = ModeTransition {
            ts: now,
            from,
            to,
            reason,
        };
        self.state.history.push(transition.clone());
        let limit = self.config.history_limit.max(1);
        if self.state.history.len() > limit {
            let excess = self.state.history.len() - limit;
            self.state.history.drain(..excess);
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PortfolioMetrics;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn gate_with(needed: u32) -> CapitalModeGate {
        CapitalModeGate::new(CapitalModeConfig {
            needed_ok_ticks: needed,
            ..Default::default()
        })
    }

    fn pass() -> Vec<GateCheck> {
        vec![GateCheck::new(GATE_PF7D_FLOOR, true, CapitalMode::DeRisk, "ok")]
    }

    fn fail(on_fail: CapitalMode) -> Vec<GateCheck> {
        vec![
            GateCheck::new(GATE_PF7D_FLOOR, true, CapitalMode::DeRisk, "ok"),
            GateCheck::new("drawdown_floor_pass", false, on_fail, "breach"),
        ]
    }

    fn healthy_metrics() -> MetricsSnapshot {
        MetricsSnapshot {
            generated_at: Some(now() - Duration::seconds(30)),
            portfolio: PortfolioMetrics {
                pf_7d: Some(1.2),
                drawdown: Some(0.05),
                closes_7d: 40,
            },
            ..Default::default()
        }
    }

    #[test]
    fn degrades_on_the_first_failing_tick() {
        let mut gate = gate_with(3);
        let t = gate.evaluate(&fail(CapitalMode::DeRisk), now()).unwrap();
        assert_eq!(t.from, CapitalMode::Normal);
        assert_eq!(t.to, CapitalMode::DeRisk);
        assert_eq!(gate.mode(), CapitalMode::DeRisk);
        assert_eq!(gate.state().hysteresis.ok_ticks, 0);
    }

    #[test]
    fn relaxes_only_after_needed_ok_ticks() {
        let mut gate = gate_with(3);
        gate.evaluate(&fail(CapitalMode::DeRisk), now());

        assert!(gate.evaluate(&pass(), now()).is_none());
        assert!(gate.evaluate(&pass(), now()).is_none());
        assert_eq!(gate.mode(), CapitalMode::DeRisk);

        let t = gate.evaluate(&pass(), now()).unwrap();
        assert_eq!(t.to, CapitalMode::Normal);
        assert_eq!(gate.state().hysteresis.ok_ticks, 0);
    }

    #[test]
    fn a_failure_resets_the_streak() {
        let mut gate = gate_with(2);
        gate.evaluate(&fail(CapitalMode::DeRisk), now());
        gate.evaluate(&pass(), now());
        gate.evaluate(&fail(CapitalMode::DeRisk), now());
        assert!(gate.evaluate(&pass(), now()).is_none());
        assert_eq!(gate.mode(), CapitalMode::DeRisk);
        assert!(gate.evaluate(&pass(), now()).is_some());
        assert_eq!(gate.mode(), CapitalMode::Normal);
    }

    #[test]
    fn zero_needed_ticks_relaxes_on_first_pass() {
        let mut gate = gate_with(0);
        gate.evaluate(&fail(CapitalMode::DeRisk), now());
        let t = gate.evaluate(&pass(), now()).unwrap();
        assert_eq!(t.to, CapitalMode::Normal);
    }

    #[test]
    fn halt_relaxes_one_step_at_a_time() {
        let mut gate = gate_with(0);
        gate.evaluate(&fail(CapitalMode::HaltNewEntries), now());
        assert_eq!(gate.mode(), CapitalMode::HaltNewEntries);

        gate.evaluate(&pass(), now());
        assert_eq!(gate.mode(), CapitalMode::DeRisk);
        gate.evaluate(&pass(), now());
        assert_eq!(gate.mode(), CapitalMode::Normal);
    }

    #[test]
    fn milder_failure_does_not_relax_a_halt() {
        let mut gate = gate_with(0);
        gate.evaluate(&fail(CapitalMode::HaltNewEntries), now());
        assert!(gate.evaluate(&fail(CapitalMode::DeRisk), now()).is_none());
        assert_eq!(gate.mode(), CapitalMode::HaltNewEntries);
    }

    #[test]
    fn missing_metrics_fail_closed() {
        let mut gate = gate_with(3);
        gate.tick(None, now());
        assert_eq!(gate.mode(), CapitalMode::DeRisk);
        assert_eq!(gate.state().gates.get(GATE_METRICS_AVAILABLE), Some(&false));
    }

    #[test]
    fn healthy_metrics_pass_every_builtin_gate() {
        let gate = gate_with(3);
        let checks = gate.build_checks(Some(&healthy_metrics()), now());
        assert_eq!(checks.len(), 6);
        assert!(checks.iter().all(|c| c.pass), "{checks:?}");
    }

    #[test]
    fn deep_pf_slump_halts() {
        let mut gate = gate_with(3);
        let mut metrics = healthy_metrics();
        metrics.portfolio.pf_7d = Some(0.7);
        gate.tick(Some(&metrics), now());
        assert_eq!(gate.mode(), CapitalMode::HaltNewEntries);
        assert_eq!(gate.state().gates.get(GATE_PF7D_FLOOR), Some(&false));
    }

    #[test]
    fn stale_metrics_de_risk() {
        let mut gate = gate_with(3);
        let mut metrics = healthy_metrics();
        metrics.generated_at = Some(now() - Duration::hours(2));
        gate.tick(Some(&metrics), now());
        assert_eq!(gate.mode(), CapitalMode::DeRisk);
    }

    #[test]
    fn external_gates_are_included() {
        let mut gate = gate_with(3);
        let mut metrics = healthy_metrics();
        metrics.gates.insert("exchange_health".into(), false);
        metrics.gates.insert(GATE_PF7D_FLOOR.into(), false);
        gate.tick(Some(&metrics), now());
        assert_eq!(gate.mode(), CapitalMode::DeRisk);
        // Built-in gate value wins over the shadowing external entry
        assert_eq!(gate.state().gates.get(GATE_PF7D_FLOOR), Some(&true));
        assert_eq!(gate.state().gates.get("exchange_health"), Some(&false));
    }

    #[test]
    fn manual_halt_resets_hysteresis() {
        let mut gate = gate_with(1);
        gate.evaluate(&pass(), now());
        assert!(gate.manual_halt("exchange incident", now()).is_some());
        assert_eq!(gate.mode(), CapitalMode::HaltNewEntries);
        assert!(gate.manual_halt("again", now()).is_none());
        assert_eq!(gate.state().hysteresis.ok_ticks, 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut gate = CapitalModeGate::new(CapitalModeConfig {
            needed_ok_ticks: 0,
            history_limit: 3,
            ..Default::default()
        });
        for _ in 0..5 {
            gate.evaluate(&fail(CapitalMode::DeRisk), now());
            gate.evaluate(&pass(), now());
        }
        assert_eq!(gate.state().history.len(), 3);
        assert_eq!(gate.state().history.last().unwrap().to, CapitalMode::Normal);
    }
}
