//! Feature-space builder
//!
//! Standardisation statistics come from the ENTIRE pool, explored and
//! unexplored alike, so the classifier sees the same feature scale in every
//! cycle while the labeled subset grows.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::search_space::{Label, SearchSpace};
use crate::{Error, Result};

/// Per-column zero-mean, unit-variance scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit on the rows of `x` (population standard deviation). Constant
    /// columns get a unit scale.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `x` has no rows
    pub fn fit(x: ArrayView2<'_, f64>) -> Result<Self> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::InvalidInput("Cannot scale an empty pool".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    /// Apply the fitted scaling.
    #[must_use]
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }

    /// Column means.
    #[must_use]
    pub const fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Column scales.
    #[must_use]
    pub const fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

/// Classifier-ready view of the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSpace {
    /// Feature matrix (points × variables), optionally standardised.
    pub x: Array2<f64>,
    /// Labels in pool order.
    pub y: Vec<Label>,
}

impl FeatureSpace {
    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Whether there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Indices of labeled points.
    #[must_use]
    pub fn known_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.y[i].is_known()).collect()
    }

    /// Indices of unlabeled points.
    #[must_use]
    pub fn unknown_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| !self.y[i].is_known()).collect()
    }
}

/// Build the feature matrix and label vector for a pool.
///
/// # Errors
/// Returns `InvalidInput` if scaling is requested on an empty pool
pub fn build_features(pool: &SearchSpace, scale: bool) -> Result<FeatureSpace> {
    let raw = pool.values().view();
    let x = if scale {
        StandardScaler::fit(raw)?.transform(raw)
    } else {
        raw.to_owned()
    };
    Ok(FeatureSpace {
        x,
        y: pool.labels().to_vec(),
    })
}
