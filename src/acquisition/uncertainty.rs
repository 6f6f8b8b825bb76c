//! Model-driven (uncertainty) sampling for cycles after the first
//!
//! Fit on the labeled subset, predict over the whole pool, score every row and
//! take the best unknown points. Candidates tied on the cut-off score are
//! resolved by farthest-point sampling anchored on the points already taken.

use ndarray::Axis;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::decision::DecisionFunction;
use super::rank::plateau;
use super::sampling::farthest_point_sampling;
use super::AcquisitionResult;
use crate::classifier::Classifier;
use crate::features::FeatureSpace;
use crate::{Error, Result};

/// Uncertainty-driven sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncertaintySampler {
    /// Scoring rule.
    pub decision: DecisionFunction,
    /// Seed for the tie-break starting point when nothing scores above the plateau.
    pub seed: u64,
}

impl UncertaintySampler {
    /// Create a sampler.
    #[must_use]
    pub const fn new(decision: DecisionFunction, seed: u64) -> Self {
        Self { decision, seed }
    }

    /// Fit `classifier` on the labeled points and select `n` unknown points.
    ///
    /// # Errors
    /// - `Configuration` if no point is labeled or fewer than `n` are unknown
    /// - `InvalidInput` if `n` is zero
    /// - `Classifier` if fitting fails or the predicted probabilities are unusable
    pub fn select(
        &self,
        features: &FeatureSpace,
        classifier: &mut dyn Classifier,
        n: usize,
    ) -> Result<AcquisitionResult> {
        let known = features.known_indices();
        let unknown = features.unknown_indices();
        if known.is_empty() {
            return Err(Error::Configuration(
                "Uncertainty sampling needs at least one labeled point".to_string(),
            ));
        }
        if n == 0 {
            return Err(Error::InvalidInput("Batch size must be positive".to_string()));
        }
        if n > unknown.len() {
            return Err(Error::Configuration(format!(
                "Requested {n} points but only {} are still unknown",
                unknown.len()
            )));
        }

        let x_known = features.x.select(Axis(0), &known);
        let y_known: Vec<i64> = known
            .iter()
            .filter_map(|&i| features.y[i].class())
            .collect();
        classifier.fit(x_known.view(), &y_known)?;

        let probabilities = classifier.predict_proba(features.x.view())?;
        if probabilities.nrows() != features.len() {
            return Err(Error::Classifier(format!(
                "Expected {} probability rows, got {}",
                features.len(),
                probabilities.nrows()
            )));
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(Error::Classifier(
                "Predicted probabilities contain non-finite values".to_string(),
            ));
        }

        let classes = classifier.classes().to_vec();
        let scores = self
            .decision
            .score(probabilities.view(), &classes)?
            .to_vec();

        let indices = self.rank(features, &scores, &unknown, n);
        info!(
            mode = %self.decision.mode,
            known = known.len(),
            unknown = unknown.len(),
            selected = indices.len(),
            "selected batch by uncertainty"
        );

        Ok(AcquisitionResult {
            indices,
            probabilities: Some(probabilities),
            scores: Some(scores),
            classes,
        })
    }

    fn rank(&self, features: &FeatureSpace, scores: &[f64], unknown: &[usize], n: usize) -> Vec<usize> {
        let Some(split) = plateau(scores, unknown, n) else {
            return Vec::new();
        };
        let remaining = split.remaining(n);
        let mut selected = split.above;
        if remaining == 0 {
            return selected;
        }

        debug!(
            threshold = split.threshold,
            tied = split.tied.len(),
            slots = remaining,
            "breaking score plateau by farthest-point sampling"
        );
        let start = if selected.is_empty() {
            ChaCha8Rng::seed_from_u64(self.seed).gen_range(0..split.tied.len())
        } else {
            0
        };
        selected.extend(farthest_point_sampling(
            features.x.view(),
            &split.tied,
            &selected,
            remaining,
            start,
        ));
        selected
    }
}
