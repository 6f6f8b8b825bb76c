//! Design-grid initialisation
//!
//! Builds the cycle-0 pool as the Cartesian product of per-variable levels.
//! Points already characterised elsewhere can be supplied as existing
//! evidence: they come first, keep their labels, and suppress the grid points
//! they duplicate.
//!
//! Row order follows a Cartesian (`xy`) mesh: with two or more variables the
//! second variable changes slowest, then the first, then the third onwards in
//! declaration order.

use std::collections::HashSet;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::acquisition::decision::round_to;
use crate::config::read_document;
use crate::search_space::{point_key, Label, LabelSchema, SearchSpace};
use crate::{Error, Result};

/// Levels of one design variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Levels {
    /// Explicit values, used as given.
    Values(Vec<f64>),
    /// `start, start + step, ...` strictly below `end`, rounded.
    Range {
        /// First level.
        start: f64,
        /// Exclusive upper bound.
        end: f64,
        /// Increment.
        #[serde(alias = "ev")]
        step: f64,
    },
}

impl Levels {
    /// Concrete level values.
    ///
    /// # Errors
    /// Returns `Configuration` for a non-positive step or an empty axis
    pub fn expand(&self, decimals: u32) -> Result<Vec<f64>> {
        let values = match *self {
            Self::Values(ref values) => values.clone(),
            Self::Range { start, end, step } => {
                if !(step > 0.0 && start.is_finite() && end.is_finite()) {
                    return Err(Error::Configuration(format!(
                        "Invalid range start={start} end={end} step={step}"
                    )));
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let count = ((end - start) / step).ceil().max(0.0) as usize;
                #[allow(clippy::cast_precision_loss)]
                let values: Vec<f64> = (0..count)
                    .map(|k| round_to(start + k as f64 * step, decimals))
                    .collect();
                values
            }
        };
        if values.is_empty() {
            return Err(Error::Configuration("Design variable has no levels".to_string()));
        }
        Ok(values)
    }
}

/// One design variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignVariable {
    /// Column name.
    pub name: String,
    /// Levels to explore.
    pub values: Levels,
}

/// Declarative description of a campaign's pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    /// Campaign identifier.
    #[serde(alias = "experimentID")]
    pub experiment_id: String,
    /// Variables in column order.
    pub variables: Vec<DesignVariable>,
    /// Label column, sentinel and classes of the pool.
    #[serde(default)]
    pub labels: LabelSchema,
    /// Rounding applied to range levels.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

const fn default_decimals() -> u32 {
    2
}

impl DesignSpec {
    /// Read a YAML or JSON design.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_document(path.as_ref())
    }

    /// Column names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    /// Default pool file name, e.g. `DOE_robot001_3Dim.csv`.
    #[must_use]
    pub fn pool_file_name(&self) -> String {
        format!("DOE_{}_{}Dim.csv", self.experiment_id, self.variables.len())
    }
}

/// Build the pool for `spec`, optionally seeded with existing evidence.
///
/// # Errors
/// - `Configuration` for a spec without variables, duplicate names, or an
///   existing pool with different design variables
/// - errors from expanding the levels
pub fn build_pool(spec: &DesignSpec, existing: Option<&SearchSpace>) -> Result<SearchSpace> {
    let names = spec.names();
    if names.is_empty() {
        return Err(Error::Configuration("Design has no variables".to_string()));
    }
    if names.iter().collect::<HashSet<_>>().len() != names.len() {
        return Err(Error::Configuration(format!("Duplicate design variables in {names:?}")));
    }
    if let Some(pool) = existing {
        if pool.feature_names() != names.as_slice() {
            return Err(Error::Configuration(format!(
                "Existing evidence has variables {:?}, design has {names:?}",
                pool.feature_names()
            )));
        }
    }

    let axes = spec
        .variables
        .iter()
        .map(|v| v.values.expand(spec.decimals))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = HashSet::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut labels = Vec::new();
    if let Some(pool) = existing {
        for point in pool.points() {
            if seen.insert(point_key(point.values.iter().copied())) {
                rows.push(point.values.to_vec());
                labels.push(point.label);
            }
        }
    }
    let evidence = rows.len();
    let mut grid = 0;
    for row in mesh(&axes) {
        grid += 1;
        if seen.insert(point_key(row.iter().copied())) {
            rows.push(row);
            labels.push(Label::Unknown);
        }
    }

    let mut values = Array2::zeros((rows.len(), names.len()));
    for (i, row) in rows.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            values[[i, j]] = value;
        }
    }
    info!(
        experiment = %spec.experiment_id,
        evidence,
        grid,
        dropped = evidence + grid - rows.len(),
        points = rows.len(),
        "built design pool"
    );
    SearchSpace::from_parts(names, values, labels, spec.labels.clone())
}

/// Mesh points in `xy` order.
fn mesh(axes: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut order: Vec<usize> = (0..axes.len()).collect();
    if order.len() >= 2 {
        order.swap(0, 1);
    }
    let total: usize = axes.iter().map(Vec::len).product();
    let mut points = Vec::with_capacity(total);
    let mut counter = vec![0usize; axes.len()];
    for _ in 0..total {
        points.push(
            axes.iter()
                .zip(&counter)
                .map(|(axis, &k)| axis[k])
                .collect(),
        );
        // odometer, fastest axis last in `order`
        for &axis in order.iter().rev() {
            counter[axis] += 1;
            if counter[axis] < axes[axis].len() {
                break;
            }
            counter[axis] = 0;
        }
    }
    points
}
