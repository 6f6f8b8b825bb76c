//! Classifier wrapper
//!
//! The cycle controller only needs `fit` and `predict_proba`; everything
//! model-specific sits behind the [`Classifier`] trait. Models are built from
//! a declarative [`ClassifierSpec`], tagged on the `model` key:
//!
//! ```json
//! {
//!   "model": "GaussianProcessClassifier",
//!   "kernel": ["*", {"type": "C", "constant_value": 1.0}, {"type": "RBF", "length_scale": 1.0}],
//!   "n_restarts_optimizer": 5,
//!   "max_iter_predict": 150,
//!   "n_jobs": 3
//! }
//! ```

pub mod gp;
pub mod kernel;
pub mod knn;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use gp::{GaussianProcessClassifier, GaussianProcessSpec};
pub use kernel::KernelExpr;
pub use knn::{KNeighborsClassifier, KNeighborsSpec};

use crate::{Error, Result};

/// Probabilistic classifier capability.
pub trait Classifier: Send {
    /// Fit on `x` (samples × features) with integer class labels `y`.
    ///
    /// # Errors
    /// Returns `Classifier` on degenerate input or numerical failure
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[i64]) -> Result<()>;

    /// Class probabilities for every row of `x`; columns follow [`Classifier::classes`].
    ///
    /// # Errors
    /// Returns `Classifier` if the model is not fitted
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>>;

    /// Sorted class labels seen during `fit` (empty before fitting).
    fn classes(&self) -> &[i64];

    /// JSON dump of the fitted model.
    ///
    /// # Errors
    /// Returns error if the model cannot be serialised
    fn to_json(&self) -> Result<Value>;
}

/// Declarative model choice plus hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum ClassifierSpec {
    /// Gaussian-process classifier (Laplace approximation).
    GaussianProcessClassifier(GaussianProcessSpec),
    /// k-nearest-neighbours vote.
    KNeighborsClassifier(KNeighborsSpec),
}

impl Default for ClassifierSpec {
    fn default() -> Self {
        Self::GaussianProcessClassifier(GaussianProcessSpec::default())
    }
}

impl ClassifierSpec {
    /// Model kind as written in configs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::GaussianProcessClassifier(_) => "GaussianProcessClassifier",
            Self::KNeighborsClassifier(_) => "KNeighborsClassifier",
        }
    }

    /// Check hyper-parameters that do not depend on the data.
    ///
    /// # Errors
    /// Returns `Configuration` or `KernelSpec` for unusable settings
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::GaussianProcessClassifier(spec) => spec.validate(),
            Self::KNeighborsClassifier(spec) => {
                if spec.n_neighbors == 0 {
                    Err(Error::Configuration("n_neighbors must be positive".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Build an unfitted model.
    #[must_use]
    pub fn build(&self) -> ClassifierModel {
        match self {
            Self::GaussianProcessClassifier(spec) => {
                ClassifierModel::GaussianProcess(GaussianProcessClassifier::new(spec.clone()))
            }
            Self::KNeighborsClassifier(spec) => {
                ClassifierModel::KNeighbors(KNeighborsClassifier::new(spec.n_neighbors))
            }
        }
    }
}

/// Any model a [`ClassifierSpec`] can build.
#[derive(Debug, Clone)]
pub enum ClassifierModel {
    /// Gaussian-process classifier.
    GaussianProcess(GaussianProcessClassifier),
    /// k-nearest-neighbours classifier.
    KNeighbors(KNeighborsClassifier),
}

impl ClassifierModel {
    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::GaussianProcess(m) => m,
            Self::KNeighbors(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Self::GaussianProcess(m) => m,
            Self::KNeighbors(m) => m,
        }
    }
}

impl Classifier for ClassifierModel {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[i64]) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.inner().predict_proba(x)
    }

    fn classes(&self) -> &[i64] {
        self.inner().classes()
    }

    fn to_json(&self) -> Result<Value> {
        self.inner().to_json()
    }
}

/// Sorted distinct labels; at least two are required to train.
pub(crate) fn distinct_classes(x: ArrayView2<'_, f64>, y: &[i64]) -> Result<Vec<i64>> {
    if x.nrows() != y.len() {
        return Err(Error::Classifier(format!(
            "{} training rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    if classes.len() < 2 {
        return Err(Error::Classifier(format!(
            "Training needs at least two classes, got {classes:?}"
        )));
    }
    Ok(classes)
}
