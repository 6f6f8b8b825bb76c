//! Decision function: probability row -> scalar acquisition score
//!
//! Higher scores are acquired first. Scores are rounded to a fixed number of
//! decimals so that near-equal candidates collapse onto plateaus and the
//! diversity tie-break gets a say.

use std::fmt;

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default rounding precision for scores.
pub const DEFAULT_DECIMALS: u32 = 2;

/// Scoring rule applied to each probability row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Shannon entropy (natural log) of the class distribution.
    #[default]
    Exploration,
    /// `1 - (p_max - p_second)`: highest where the two leading classes are closest.
    Margin,
    /// Probability of one class of interest.
    Exploitation {
        /// Class label whose probability is maximised.
        class: i64,
    },
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exploration => write!(f, "exploration"),
            Self::Margin => write!(f, "margin"),
            Self::Exploitation { class } => write!(f, "exploitation(class={class})"),
        }
    }
}

/// Configured scoring rule plus rounding precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionFunction {
    /// Scoring rule.
    #[serde(flatten)]
    pub mode: AcquisitionMode,
    /// Decimals kept after rounding the score.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

const fn default_decimals() -> u32 {
    DEFAULT_DECIMALS
}

impl Default for DecisionFunction {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Exploration,
            decimals: DEFAULT_DECIMALS,
        }
    }
}

impl DecisionFunction {
    /// Create a decision function.
    #[must_use]
    pub const fn new(mode: AcquisitionMode, decimals: u32) -> Self {
        Self { mode, decimals }
    }

    /// Score every row of `probabilities`. `classes[j]` labels column `j`.
    ///
    /// # Errors
    /// Returns `Configuration` if exploitation targets a class the model does not know
    pub fn score(&self, probabilities: ArrayView2<'_, f64>, classes: &[i64]) -> Result<Array1<f64>> {
        let raw = match self.mode {
            AcquisitionMode::Exploration => probabilities.map_axis(Axis(1), entropy),
            AcquisitionMode::Margin => probabilities.map_axis(Axis(1), margin),
            AcquisitionMode::Exploitation { class } => {
                let column = classes.iter().position(|&c| c == class).ok_or_else(|| {
                    Error::Configuration(format!(
                        "Exploitation class {class} is not among the fitted classes {classes:?}"
                    ))
                })?;
                probabilities.column(column).to_owned()
            }
        };
        Ok(raw.mapv(|v| round_to(v, self.decimals)))
    }
}

/// Shannon entropy (nats) of a probability row, renormalised to sum to one.
#[must_use]
pub fn entropy(row: ArrayView1<'_, f64>) -> f64 {
    let total: f64 = row.sum();
    if total <= 0.0 {
        return 0.0;
    }
    -row.iter()
        .map(|&p| p / total)
        .filter(|&p| p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>()
}

/// `1 - (p_max - p_second)`; a single-column row has margin 0.
#[must_use]
pub fn margin(row: ArrayView1<'_, f64>) -> f64 {
    let mut first = f64::NEG_INFINITY;
    let mut second = f64::NEG_INFINITY;
    for &p in row {
        if p > first {
            second = first;
            first = p;
        } else if p > second {
            second = p;
        }
    }
    if second.is_finite() {
        1.0 - (first - second)
    } else {
        0.0
    }
}

/// Round half away from zero to `decimals` places.
#[must_use]
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    if !factor.is_finite() {
        return value;
    }
    (value * factor).round() / factor
}
