//! Acquisition engine
//!
//! Two policies, chosen by cycle index:
//! - [`DiversitySampler`]: model-free, for the unexplored pool of cycle 0
//! - [`UncertaintySampler`]: classifier-driven, for every later cycle

pub mod decision;
pub mod rank;
pub mod sampling;
pub mod uncertainty;

use ndarray::Array2;

pub use decision::{AcquisitionMode, DecisionFunction};
pub use sampling::{farthest_point_sampling, DiversitySampler, SamplingMode};
pub use uncertainty::UncertaintySampler;

/// Points picked by one acquisition step.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionResult {
    /// Selected positional indices, in selection order.
    pub indices: Vec<usize>,
    /// Full-pool class probabilities (model-based policies only).
    pub probabilities: Option<Array2<f64>>,
    /// Full-pool rounded scores (model-based policies only).
    pub scores: Option<Vec<f64>>,
    /// Class label of each probability column.
    pub classes: Vec<i64>,
}

impl AcquisitionResult {
    /// Result of a model-free policy.
    #[must_use]
    pub const fn model_free(indices: Vec<usize>) -> Self {
        Self {
            indices,
            probabilities: None,
            scores: None,
            classes: Vec::new(),
        }
    }

    /// Number of selected points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
