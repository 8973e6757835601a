//! Risk multiplier
//!
//! Maps rolling metrics to a bounded sizing scalar. Each adjustment is evaluated
//! independently, so a PF bonus and a volatility penalty can both apply.

use serde::{Deserialize, Serialize};

pub const MIN_MULTIPLIER: f64 = 0.2;
pub const MAX_MULTIPLIER: f64 = 2.0;

/// Compute the risk multiplier for one symbol, clamped to `[0.2, 2.0]`
pub fn compute_multiplier(
    pf_local: f64,
    drawdown: f64,
    edge: f64,
    volatility: f64,
    confidence: f64,
) -> f64 {
    let mut mult: f64 = 1.0;

    // PF tier
    if pf_local > 1.2 {
        mult *= 1.2;
    } else if pf_local > 1.1 {
        mult *= 1.1;
    } else if pf_local < 0.95 {
        mult *= 0.7;
    }

    // Drawdown tier
    if drawdown > 0.20 {
        mult *= 0.5;
    } else if drawdown > 0.10 {
        mult *= 0.7;
    }

    // Edge sign
    if edge > 0.001 {
        mult *= 1.1;
    } else if edge < 0.0 {
        mult *= 0.8;
    }

    // Volatility tier
    if volatility > 0.8 {
        mult *= 0.6;
    } else if volatility > 0.5 {
        mult *= 0.8;
    }

    // Confidence tier
    if confidence < 0.5 {
        mult *= 0.7;
    } else if confidence > 0.8 {
        mult *= 1.1;
    }

    if mult.is_nan() {
        return MIN_MULTIPLIER;
    }
    mult.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
}

/// Multiplier inputs with neutral defaults for anything the caller lacks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiplierInputs {
    pub pf_local: f64,
    pub drawdown: f64,
    pub edge: f64,
    pub volatility: f64,
    pub confidence: f64,
}

impl Default for MultiplierInputs {
    fn default() -> Self {
        Self {
            pf_local: 1.0,
            drawdown: 0.0,
            edge: 0.0,
            volatility: 0.0,
            confidence: 0.5,
        }
    }
}

impl MultiplierInputs {
    /// Fill missing values with the neutral defaults
    pub fn from_optional(
        pf_local: Option<f64>,
        drawdown: Option<f64>,
        edge: Option<f64>,
        volatility: Option<f64>,
        confidence: Option<f64>,
    ) -> Self {
        let d = Self::default();
        Self {
            pf_local: pf_local.unwrap_or(d.pf_local),
            drawdown: drawdown.unwrap_or(d.drawdown),
            edge: edge.unwrap_or(d.edge),
            volatility: volatility.unwrap_or(d.volatility),
            confidence: confidence.unwrap_or(d.confidence),
        }
    }

    pub fn multiplier(&self) -> f64 {
        compute_multiplier(
            self.pf_local,
            self.drawdown,
            self.edge,
            self.volatility,
            self.confidence,
        )
    }
}
