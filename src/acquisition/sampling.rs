//! Model-free diversity sampling
//!
//! Farthest-point sampling (FPS) greedily adds the candidate whose distance to
//! the nearest already-selected point is largest. It is used on its own for
//! cycle 0 and, anchored on the points already picked, to break ties between
//! equally scored candidates in later cycles.

use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AcquisitionResult;
use crate::features::FeatureSpace;
use crate::{Error, Result};

/// Model-free sampling policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Farthest-point sampling.
    #[default]
    #[serde(rename = "FPS", alias = "fps")]
    Fps,
    /// Uniform sampling without replacement.
    #[serde(rename = "random", alias = "Random")]
    Random,
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fps => write!(f, "FPS"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Cycle-0 sampler. The seed fully determines the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiversitySampler {
    /// Sampling policy.
    pub mode: SamplingMode,
    /// RNG seed (FPS starting point, or the random draw).
    pub seed: u64,
}

impl DiversitySampler {
    /// Create a sampler.
    #[must_use]
    pub const fn new(mode: SamplingMode, seed: u64) -> Self {
        Self { mode, seed }
    }

    /// Select `n` points from a completely unexplored pool.
    ///
    /// # Errors
    /// - `Configuration` if any point is already labeled
    /// - `InvalidInput` if `n` is zero or larger than the pool
    pub fn sample(&self, features: &FeatureSpace, n: usize) -> Result<AcquisitionResult> {
        let known = features.known_indices();
        if !known.is_empty() {
            return Err(Error::Configuration(format!(
                "Diversity sampling assumes an unexplored search space, but {} points are already labeled",
                known.len()
            )));
        }
        let indices = self.sample_matrix(features.x.view(), n)?;
        info!(mode = %self.mode, seed = self.seed, n, "sampled initial batch");
        Ok(AcquisitionResult::model_free(indices))
    }

    /// Select `n` row indices of `x`, ignoring labels.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `n` is zero or larger than the number of rows
    pub fn sample_matrix(&self, x: ArrayView2<'_, f64>, n: usize) -> Result<Vec<usize>> {
        let rows = x.nrows();
        if n == 0 || n > rows {
            return Err(Error::InvalidInput(format!(
                "Cannot sample {n} points from a pool of {rows}"
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok(match self.mode {
            SamplingMode::Fps => {
                let candidates: Vec<usize> = (0..rows).collect();
                let start = rng.gen_range(0..rows);
                farthest_point_sampling(x, &candidates, &[], n, start)
            }
            SamplingMode::Random => index::sample(&mut rng, rows, n).into_vec(),
        })
    }
}

/// Greedy farthest-point sampling over `candidates`.
///
/// With a non-empty `anchors` set, distances are measured to the anchors from
/// the start and `start` is ignored; otherwise `candidates[start]` is picked
/// first. Ties go to the earliest candidate. Returns at most `n` indices, in
/// selection order.
#[must_use]
pub fn farthest_point_sampling(
    x: ArrayView2<'_, f64>,
    candidates: &[usize],
    anchors: &[usize],
    n: usize,
    start: usize,
) -> Vec<usize> {
    let n = n.min(candidates.len());
    let mut selected = Vec::with_capacity(n);
    if n == 0 {
        return selected;
    }

    let mut nearest = vec![f64::INFINITY; candidates.len()];
    let mut taken = vec![false; candidates.len()];

    let relax = |nearest: &mut [f64], from: ArrayView1<'_, f64>| {
        for (slot, &c) in nearest.iter_mut().zip(candidates) {
            let d = squared_distance(x.row(c), from);
            if d < *slot {
                *slot = d;
            }
        }
    };

    if anchors.is_empty() {
        let first = start.min(candidates.len() - 1);
        taken[first] = true;
        selected.push(candidates[first]);
        relax(&mut nearest, x.row(candidates[first]));
    } else {
        for &a in anchors {
            relax(&mut nearest, x.row(a));
        }
    }

    while selected.len() < n {
        let mut best: Option<usize> = None;
        for (pos, &d) in nearest.iter().enumerate() {
            if taken[pos] {
                continue;
            }
            if best.map_or(true, |b| d > nearest[b]) {
                best = Some(pos);
            }
        }
        let Some(pos) = best else { break };
        taken[pos] = true;
        selected.push(candidates[pos]);
        relax(&mut nearest, x.row(candidates[pos]));
    }

    selected
}

/// Squared Euclidean distance between two rows.
#[must_use]
pub fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_space::Label;
    use ndarray::{array, Array2};

    fn line(n: usize) -> Array2<f64> {
        #[allow(clippy::cast_precision_loss)]
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        x
    }

    #[test]
    fn test_fps_on_a_line_spreads_to_the_ends() {
        let x = line(11);
        let candidates: Vec<usize> = (0..11).collect();
        let picked = farthest_point_sampling(x.view(), &candidates, &[], 3, 0);
        assert_eq!(picked, vec![0, 10, 5]);
    }

    #[test]
    fn test_fps_with_anchors_avoids_them() {
        let x = line(11);
        let candidates: Vec<usize> = (1..10).collect();
        let picked = farthest_point_sampling(x.view(), &candidates, &[0, 10], 1, 0);
        assert_eq!(picked, vec![5]);
    }

    #[test]
    fn test_fps_caps_at_candidate_count() {
        let x = line(4);
        let picked = farthest_point_sampling(x.view(), &[1, 2], &[], 5, 0);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn test_sampler_is_reproducible() {
        let x = line(50);
        for mode in [SamplingMode::Fps, SamplingMode::Random] {
            let sampler = DiversitySampler::new(mode, 7);
            let a = sampler.sample_matrix(x.view(), 10).unwrap();
            let b = sampler.sample_matrix(x.view(), 10).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_sampler_rejects_labeled_pool() {
        let features = FeatureSpace {
            x: array![[0.0], [1.0]],
            y: vec![Label::Class(0), Label::Unknown],
        };
        let err = DiversitySampler::new(SamplingMode::Fps, 0)
            .sample(&features, 1)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_sampler_rejects_oversized_batch() {
        let x = line(3);
        let sampler = DiversitySampler::new(SamplingMode::Random, 0);
        assert!(sampler.sample_matrix(x.view(), 4).is_err());
        assert!(sampler.sample_matrix(x.view(), 0).is_err());
    }

    #[test]
    fn test_sampling_mode_serde_names() {
        let fps: SamplingMode = serde_json::from_str("\"FPS\"").unwrap();
        let random: SamplingMode = serde_json::from_str("\"random\"").unwrap();
        assert_eq!(fps, SamplingMode::Fps);
        assert_eq!(random, SamplingMode::Random);
    }
}
