//! Gaussian-process classifier (Laplace approximation)
//!
//! Binary problems use a logistic likelihood; the posterior over the latent
//! function is approximated by a Gaussian centred at its mode, found with
//! Newton iterations (Rasmussen & Williams, Algorithm 3.1). Predictions
//! integrate the latent variance with the probit-moderated sigmoid.
//!
//! Multiclass problems are one-vs-rest with row normalisation.
//!
//! Kernel hyper-parameters are tuned by maximising the Laplace log-marginal
//! likelihood with a compass search in log space, optionally from several
//! random starts run on a rayon pool.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::kernel::KernelExpr;
use super::{distinct_classes, Classifier};
use crate::{Error, Result};

/// Hyper-parameter search bounds (log space).
const LOG_BOUNDS: (f64, f64) = (-11.512_925_464_970_229, 11.512_925_464_970_229);
/// Newton iterations stop once the objective improves by less than this.
const NEWTON_TOLERANCE: f64 = 1e-10;
/// Initial and final compass step (log space).
const SEARCH_STEP: (f64, f64) = (1.0, 1e-3);
/// Objective evaluations per optimiser start.
const MAX_EVALUATIONS: usize = 500;

/// Hyper-parameters of the GP classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianProcessSpec {
    /// Prior covariance.
    pub kernel: KernelExpr,
    /// Extra optimiser starts drawn log-uniformly inside the bounds.
    pub n_restarts_optimizer: usize,
    /// Newton iterations when locating the posterior mode.
    pub max_iter_predict: usize,
    /// Worker threads for the optimiser restarts (`-1` = all cores).
    pub n_jobs: Option<i32>,
    /// Seed for the restart draws.
    pub random_state: Option<u64>,
    /// Tune the kernel on the data; `false` keeps it as given.
    pub optimizer: bool,
}

impl Default for GaussianProcessSpec {
    fn default() -> Self {
        Self {
            kernel: KernelExpr::default(),
            n_restarts_optimizer: 0,
            max_iter_predict: 100,
            n_jobs: None,
            random_state: None,
            optimizer: true,
        }
    }
}

impl GaussianProcessSpec {
    /// # Errors
    /// Returns `Configuration` for a zero iteration budget or `KernelSpec`
    /// for non-positive kernel parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_iter_predict == 0 {
            return Err(Error::Configuration(
                "max_iter_predict must be positive".to_string(),
            ));
        }
        if let Some(0) = self.n_jobs {
            return Err(Error::Configuration("n_jobs must not be 0".to_string()));
        }
        self.kernel.validate_parameters()
    }
}

/// Laplace approximation for one binary problem.
#[derive(Debug, Clone)]
struct BinaryLaplace {
    kernel: KernelExpr,
    x_train: Array2<f64>,
    target: DVector<f64>,
    latent: DVector<f64>,
    pi: DVector<f64>,
    w_sqrt: DVector<f64>,
    /// Lower Cholesky factor of `I + W^½ K W^½`.
    l: DMatrix<f64>,
    log_marginal_likelihood: f64,
}

impl BinaryLaplace {
    /// Locate the posterior mode for a fixed kernel.
    fn fit(kernel: &KernelExpr, x: ArrayView2<'_, f64>, target: &DVector<f64>, max_iter: usize) -> Result<Self> {
        let k = to_dmatrix(&kernel.gram(x));
        let n = target.len();

        let mut f: DVector<f64> = DVector::zeros(n);
        let mut lml = f64::NEG_INFINITY;
        let mut state = None;
        for _ in 0..max_iter {
            let pi = f.map(sigmoid);
            let w = pi.map(|p| p * (1.0 - p));
            let w_sqrt = w.map(f64::sqrt);

            let b_matrix = DMatrix::identity(n, n) + scale_rows_cols(&k, &w_sqrt);
            let chol = b_matrix.cholesky().ok_or_else(|| {
                Error::Classifier("Laplace system is not positive definite".to_string())
            })?;

            let b = w.component_mul(&f) + (target - &pi);
            let kb = &k * &b;
            let a = &b - w_sqrt.component_mul(&chol.solve(&w_sqrt.component_mul(&kb)));
            let next = &k * &a;

            let l = chol.l();
            let log_det: f64 = l.diagonal().iter().map(|d| d.ln()).sum();
            let likelihood: f64 = target
                .iter()
                .zip(next.iter())
                .map(|(&t, &fi)| -softplus(-(2.0 * t - 1.0) * fi))
                .sum();
            let objective = -0.5 * a.dot(&next) + likelihood - log_det;

            // the posterior terms stay paired with the factorisation they came from
            state = Some((l, pi, w_sqrt));
            f = next;
            if objective - lml < NEWTON_TOLERANCE {
                lml = lml.max(objective);
                break;
            }
            lml = objective;
        }

        let (l, pi, w_sqrt) =
            state.ok_or_else(|| Error::Classifier("No Newton iteration ran".to_string()))?;
        if !lml.is_finite() {
            return Err(Error::Classifier(
                "Log-marginal likelihood is not finite".to_string(),
            ));
        }
        Ok(Self {
            kernel: kernel.clone(),
            x_train: x.to_owned(),
            target: target.clone(),
            latent: f,
            pi,
            w_sqrt,
            l,
            log_marginal_likelihood: lml,
        })
    }

    /// Probability of the positive class for each row of `x`.
    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        let k_star = to_dmatrix(&self.kernel.cross(self.x_train.view(), x));
        let f_star = k_star.tr_mul(&(&self.target - &self.pi));
        let weighted = scale_rows(&k_star, &self.w_sqrt);
        let v = self
            .l
            .solve_lower_triangular(&weighted)
            .unwrap_or_else(|| DMatrix::zeros(weighted.nrows(), weighted.ncols()));
        let prior = self.kernel.diag(x);

        (0..x.nrows())
            .map(|j| {
                let explained: f64 = v.column(j).iter().map(|e| e * e).sum();
                let var = (prior[j] - explained).max(0.0);
                sigmoid(f_star[j] / (1.0 + PI * var / 8.0).sqrt())
            })
            .collect()
    }

    fn to_json(&self) -> Value {
        json!({
            "kernel": self.kernel.to_json(),
            "kernel_text": self.kernel.to_string(),
            "log_marginal_likelihood": self.log_marginal_likelihood,
            "latent_mode": self.latent.as_slice(),
            "target": self.target.as_slice(),
        })
    }
}

/// Gaussian-process classifier.
#[derive(Debug, Clone)]
pub struct GaussianProcessClassifier {
    spec: GaussianProcessSpec,
    classes: Vec<i64>,
    estimators: Vec<BinaryLaplace>,
}

impl GaussianProcessClassifier {
    /// Unfitted classifier.
    #[must_use]
    pub const fn new(spec: GaussianProcessSpec) -> Self {
        Self {
            spec,
            classes: Vec::new(),
            estimators: Vec::new(),
        }
    }

    /// Hyper-parameters.
    #[must_use]
    pub const fn spec(&self) -> &GaussianProcessSpec {
        &self.spec
    }

    /// Fitted kernels, one per binary problem.
    #[must_use]
    pub fn kernels(&self) -> Vec<&KernelExpr> {
        self.estimators.iter().map(|e| &e.kernel).collect()
    }

    /// Log-marginal likelihood of each binary problem.
    #[must_use]
    pub fn log_marginal_likelihoods(&self) -> Vec<f64> {
        self.estimators
            .iter()
            .map(|e| e.log_marginal_likelihood)
            .collect()
    }

    fn fit_binary(&self, x: ArrayView2<'_, f64>, target: &DVector<f64>) -> Result<BinaryLaplace> {
        let max_iter = self.spec.max_iter_predict;
        if !self.spec.optimizer || self.spec.kernel.n_params() == 0 {
            return BinaryLaplace::fit(&self.spec.kernel, x, target, max_iter);
        }

        let mut starts = vec![self.spec.kernel.theta()];
        let mut rng = ChaCha8Rng::seed_from_u64(self.spec.random_state.unwrap_or(0));
        for _ in 0..self.spec.n_restarts_optimizer {
            starts.push(
                (0..self.spec.kernel.n_params())
                    .map(|_| rng.gen_range(LOG_BOUNDS.0..LOG_BOUNDS.1))
                    .collect(),
            );
        }

        let search = |start: &Vec<f64>| compass_search(&self.spec.kernel, x, target, max_iter, start);
        let results: Vec<(Vec<f64>, f64)> = self.run_starts(&starts, search)?;

        let (theta, lml) = results
            .into_iter()
            .fold(None, |best: Option<(Vec<f64>, f64)>, candidate| match best {
                Some(b) if b.1 >= candidate.1 => Some(b),
                _ => Some(candidate),
            })
            .ok_or_else(|| Error::Classifier("No optimiser start succeeded".to_string()))?;
        if !lml.is_finite() {
            return Err(Error::Classifier(
                "Hyper-parameter search found no finite log-marginal likelihood".to_string(),
            ));
        }

        let kernel = self.spec.kernel.with_theta(&theta)?;
        debug!(kernel = %kernel, lml, starts = starts.len(), "optimised kernel");
        BinaryLaplace::fit(&kernel, x, target, max_iter)
    }

    #[cfg(feature = "rayon")]
    fn run_starts<F>(&self, starts: &[Vec<f64>], search: F) -> Result<Vec<(Vec<f64>, f64)>>
    where
        F: Fn(&Vec<f64>) -> (Vec<f64>, f64) + Sync,
    {
        use rayon::prelude::*;

        match self.spec.n_jobs {
            Some(jobs) if jobs != 1 && starts.len() > 1 => {
                let threads = usize::try_from(jobs).unwrap_or(0);
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| Error::Classifier(format!("Failed to start worker pool: {e}")))?;
                Ok(pool.install(|| starts.par_iter().map(&search).collect()))
            }
            _ => Ok(starts.iter().map(search).collect()),
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn run_starts<F>(&self, starts: &[Vec<f64>], search: F) -> Result<Vec<(Vec<f64>, f64)>>
    where
        F: Fn(&Vec<f64>) -> (Vec<f64>, f64) + Sync,
    {
        Ok(starts.iter().map(search).collect())
    }
}

impl Classifier for GaussianProcessClassifier {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[i64]) -> Result<()> {
        let classes = distinct_classes(x, y)?;
        self.spec.kernel.validate(x.ncols())?;

        let positives: Vec<i64> = if classes.len() == 2 {
            vec![classes[1]]
        } else {
            classes.clone()
        };
        let estimators = positives
            .iter()
            .map(|&positive| {
                let target = DVector::from_iterator(
                    y.len(),
                    y.iter().map(|&label| if label == positive { 1.0 } else { 0.0 }),
                );
                self.fit_binary(x, &target)
            })
            .collect::<Result<Vec<_>>>()?;

        self.classes = classes;
        self.estimators = estimators;
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if self.estimators.is_empty() {
            return Err(Error::Classifier(
                "GaussianProcessClassifier is not fitted".to_string(),
            ));
        }
        let n = x.nrows();
        if let [binary] = self.estimators.as_slice() {
            let p = binary.predict(x);
            return Ok(Array2::from_shape_fn((n, 2), |(i, j)| {
                if j == 1 {
                    p[i]
                } else {
                    1.0 - p[i]
                }
            }));
        }

        let columns: Vec<Vec<f64>> = self.estimators.iter().map(|e| e.predict(x)).collect();
        let mut probabilities = Array2::from_shape_fn((n, columns.len()), |(i, j)| columns[j][i]);
        for mut row in probabilities.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        Ok(probabilities)
    }

    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn to_json(&self) -> Result<Value> {
        Ok(json!({
            "model": "GaussianProcessClassifier",
            "spec": serde_json::to_value(&self.spec)?,
            "classes": self.classes,
            "multi_class": if self.estimators.len() > 1 { "one_vs_rest" } else { "binary" },
            "estimators": self.estimators.iter().map(BinaryLaplace::to_json).collect::<Vec<_>>(),
        }))
    }
}

/// Compass search on the log-marginal likelihood from `start`.
fn compass_search(
    kernel: &KernelExpr,
    x: ArrayView2<'_, f64>,
    target: &DVector<f64>,
    max_iter: usize,
    start: &[f64],
) -> (Vec<f64>, f64) {
    let objective = |theta: &[f64]| {
        kernel
            .with_theta(theta)
            .and_then(|k| BinaryLaplace::fit(&k, x, target, max_iter))
            .map_or(f64::NEG_INFINITY, |fit| fit.log_marginal_likelihood)
    };

    let mut theta: Vec<f64> = start.iter().map(|t| clamp_log(*t)).collect();
    let mut best = objective(&theta);
    let mut step = SEARCH_STEP.0;
    let mut evaluations = 1;

    while step > SEARCH_STEP.1 && evaluations < MAX_EVALUATIONS {
        let mut improved = false;
        'directions: for d in 0..theta.len() {
            for sign in [1.0, -1.0] {
                let mut candidate = theta.clone();
                candidate[d] = clamp_log(candidate[d] + sign * step);
                if (candidate[d] - theta[d]).abs() < f64::EPSILON {
                    continue;
                }
                let value = objective(&candidate);
                evaluations += 1;
                if value > best + NEWTON_TOLERANCE {
                    theta = candidate;
                    best = value;
                    improved = true;
                    break 'directions;
                }
            }
        }
        if !improved {
            step /= 2.0;
        }
    }
    (theta, best)
}

fn clamp_log(value: f64) -> f64 {
    value.clamp(LOG_BOUNDS.0, LOG_BOUNDS.1)
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// `diag(s) * m * diag(s)`
fn scale_rows_cols(m: &DMatrix<f64>, s: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| s[i] * m[(i, j)] * s[j])
}

/// `diag(s) * m`
fn scale_rows(m: &DMatrix<f64>, s: &DVector<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| s[i] * m[(i, j)])
}
