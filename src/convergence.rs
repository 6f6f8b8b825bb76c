//! Convergence diagnostics from stored probability matrices
//!
//! Each model-based cycle leaves a full-pool probability matrix behind. The
//! per-point entropy of those matrices, compared cycle to cycle, tells how
//! much of the pool the last round of lab work actually settled.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_npy::read_npy;
use serde::Serialize;
use tracing::{info, warn};

use crate::acquisition::decision::{entropy, round_to};
use crate::config::{Artifact, CampaignPaths};
use crate::{Error, Result};

/// Default half-width of the "no change" band.
pub const DEFAULT_BAND: f64 = 0.05;

/// Entropy of every row, optionally rounded.
#[must_use]
pub fn entropy_per_point(probabilities: ArrayView2<'_, f64>, decimals: Option<u32>) -> Array1<f64> {
    probabilities
        .rows()
        .into_iter()
        .map(|row| {
            let h = entropy(row);
            decimals.map_or(h, |d| round_to(h, d))
        })
        .collect()
}

/// Fractions of the pool whose entropy moved between two cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntropyShift {
    /// Earlier cycle.
    pub from: u32,
    /// Later cycle.
    pub to: u32,
    /// Fraction with `ΔH < -band`.
    pub decreased: f64,
    /// Fraction with `ΔH > band`.
    pub increased: f64,
}

impl EntropyShift {
    /// Compare two entropy vectors over the same pool.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the vectors are empty or differ in length
    pub fn between(
        (from, prev): (u32, ArrayView1<'_, f64>),
        (to, next): (u32, ArrayView1<'_, f64>),
        band: f64,
    ) -> Result<Self> {
        if prev.len() != next.len() || prev.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Cannot compare entropies of {} and {} points",
                prev.len(),
                next.len()
            )));
        }
        let mut decreased = 0usize;
        let mut increased = 0usize;
        for (a, b) in prev.iter().zip(next.iter()) {
            let delta = b - a;
            if delta < -band {
                decreased += 1;
            } else if delta > band {
                increased += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let n = prev.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let shift = Self {
            from,
            to,
            decreased: decreased as f64 / n,
            increased: increased as f64 / n,
        };
        Ok(shift)
    }
}

/// Load the entropy vectors of `cycles`, skipping cycles without a stored
/// probability matrix.
///
/// # Errors
/// - `Configuration` if fewer than two cycles could be loaded
/// - `Npy` if a stored matrix is unreadable
pub fn load_cycle_entropies(
    paths: &CampaignPaths,
    experiment_id: &str,
    cycles: &[u32],
    decimals: Option<u32>,
) -> Result<Vec<(u32, Array1<f64>)>> {
    let mut loaded = Vec::new();
    for &cycle in cycles {
        let path = paths.artifact(experiment_id, cycle, Artifact::Probabilities);
        if !path.exists() {
            warn!(cycle, path = %path.display(), "no probability matrix for cycle, skipping");
            continue;
        }
        let probabilities: Array2<f64> = read_npy(&path)?;
        loaded.push((cycle, entropy_per_point(probabilities.view(), decimals)));
    }
    if loaded.len() < 2 {
        return Err(Error::Configuration(format!(
            "Convergence needs at least 2 cycles with probability matrices, found {}",
            loaded.len()
        )));
    }
    Ok(loaded)
}

/// Shifts between consecutive loaded cycles.
///
/// # Errors
/// Returns `InvalidInput` if two cycles cover pools of different sizes
pub fn consecutive_shifts(entropies: &[(u32, Array1<f64>)], band: f64) -> Result<Vec<EntropyShift>> {
    let shifts = entropies
        .windows(2)
        .map(|pair| {
            EntropyShift::between(
                (pair[0].0, pair[0].1.view()),
                (pair[1].0, pair[1].1.view()),
                band,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    for shift in &shifts {
        info!(
            from = shift.from,
            to = shift.to,
            decreased = shift.decreased,
            increased = shift.increased,
            "entropy shift"
        );
    }
    Ok(shifts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_entropy_per_point() {
        let h = entropy_per_point(array![[0.5, 0.5], [1.0, 0.0]].view(), Some(2));
        assert_abs_diff_eq!(h[0], 0.69);
        assert_abs_diff_eq!(h[1], 0.0);
    }

    #[test]
    fn test_shift_fractions_respect_band() {
        let prev = array![0.6, 0.6, 0.6, 0.6];
        let next = array![0.1, 0.58, 0.69, 0.6];
        let shift = EntropyShift::between((1, prev.view()), (2, next.view()), DEFAULT_BAND).unwrap();
        assert_abs_diff_eq!(shift.decreased, 0.25);
        assert_abs_diff_eq!(shift.increased, 0.25);
    }

    #[test]
    fn test_shift_length_mismatch() {
        let a = array![0.1];
        let b = array![0.1, 0.2];
        assert!(EntropyShift::between((0, a.view()), (1, b.view()), 0.0).is_err());
    }

    #[test]
    fn test_load_needs_two_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CampaignPaths::new(dir.path(), dir.path().join("master"));
        let cycle_dir = paths.cycle_dir(1);
        std::fs::create_dir_all(&cycle_dir).unwrap();
        ndarray_npy::write_npy(
            paths.artifact("e", 1, Artifact::Probabilities),
            &array![[0.5, 0.5]],
        )
        .unwrap();

        let err = load_cycle_entropies(&paths, "e", &[0, 1], None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
