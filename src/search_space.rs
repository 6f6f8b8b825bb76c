//! Search-space store: the fixed DoE pool and its labels
//!
//! The pool is created once (cycle 0) and only ever gains labels afterwards.
//! A point's row position is its identity for the whole campaign: it is the
//! join key between the pool, per-cycle `.ndx` files and the ledger.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage;
use crate::{Error, Result};

/// Label of a candidate point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Not yet validated in the lab.
    Unknown,
    /// Validated class index.
    Class(i64),
}

impl Label {
    /// Decode an on-disk label code.
    #[must_use]
    pub const fn from_raw(raw: i64, sentinel: i64) -> Self {
        if raw == sentinel {
            Self::Unknown
        } else {
            Self::Class(raw)
        }
    }

    /// Encode for storage.
    #[must_use]
    pub const fn to_raw(self, sentinel: i64) -> i64 {
        match self {
            Self::Unknown => sentinel,
            Self::Class(class) => class,
        }
    }

    /// Whether the label is known.
    #[must_use]
    pub const fn is_known(self) -> bool {
        matches!(self, Self::Class(_))
    }

    /// Class index, if known.
    #[must_use]
    pub const fn class(self) -> Option<i64> {
        match self {
            Self::Unknown => None,
            Self::Class(class) => Some(class),
        }
    }
}

/// Label column name, unknown sentinel and declared class set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSchema {
    /// Name of the label column.
    pub target: String,
    /// On-disk code for "not yet validated".
    pub unknown: i64,
    /// Declared classes.
    pub classes: Vec<i64>,
}

impl Default for LabelSchema {
    fn default() -> Self {
        Self {
            target: "Phase".to_string(),
            unknown: -1,
            classes: vec![0, 1],
        }
    }
}

impl LabelSchema {
    /// Decode and validate a raw code.
    ///
    /// # Errors
    /// Returns `InvalidLabel` for codes that are neither the sentinel nor a declared class
    pub fn decode(&self, row: usize, raw: i64) -> Result<Label> {
        let label = Label::from_raw(raw, self.unknown);
        match label {
            Label::Class(class) if !self.classes.contains(&class) => Err(self.invalid(row, raw)),
            _ => Ok(label),
        }
    }

    /// Decode a code coming from lab validation, where the sentinel is not allowed.
    ///
    /// # Errors
    /// Returns `InvalidLabel` for the sentinel or undeclared classes
    pub fn decode_validated(&self, row: usize, raw: i64) -> Result<i64> {
        match self.decode(row, raw)? {
            Label::Class(class) => Ok(class),
            Label::Unknown => Err(self.invalid(row, raw)),
        }
    }

    fn invalid(&self, row: usize, raw: i64) -> Error {
        Error::InvalidLabel {
            row,
            label: raw.to_string(),
            expected: self.classes.clone(),
        }
    }
}

/// Borrowed view of one pool row.
#[derive(Debug, Clone)]
pub struct CandidatePoint<'a> {
    /// Positional index in the pool.
    pub index: usize,
    /// Design-variable values.
    pub values: ArrayView1<'a, f64>,
    /// Current label.
    pub label: Label,
}

/// Outcome of merging a validated batch into the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Points that went from unknown to known.
    pub labeled: Vec<usize>,
    /// Known points whose label was replaced by a different one.
    pub corrected: Vec<usize>,
    /// Known points re-validated with the same label.
    pub confirmed: Vec<usize>,
    /// Known points left untouched because overwriting was disabled.
    pub skipped: Vec<usize>,
}

/// The full ordered pool of candidate points for one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    feature_names: Vec<String>,
    values: Array2<f64>,
    labels: Vec<Label>,
    schema: LabelSchema,
}

impl SearchSpace {
    /// Assemble a pool from its parts.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the shapes disagree
    pub fn from_parts(
        feature_names: Vec<String>,
        values: Array2<f64>,
        labels: Vec<Label>,
        schema: LabelSchema,
    ) -> Result<Self> {
        if values.ncols() != feature_names.len() {
            return Err(Error::InvalidInput(format!(
                "{} feature names for {} value columns",
                feature_names.len(),
                values.ncols()
            )));
        }
        if values.nrows() != labels.len() {
            return Err(Error::InvalidInput(format!(
                "{} labels for {} pool rows",
                labels.len(),
                values.nrows()
            )));
        }
        if feature_names.iter().any(|name| name == &schema.target) {
            return Err(Error::InvalidInput(format!(
                "Label column '{}' cannot also be a design variable",
                schema.target
            )));
        }
        Ok(Self {
            feature_names,
            values,
            labels,
            schema,
        })
    }

    /// Load a pool from CSV or Parquet. Every column except the label column
    /// is a design variable.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, a design cell is non-numeric
    /// or a label code is invalid
    pub fn load<P: AsRef<Path>>(path: P, schema: LabelSchema) -> Result<Self> {
        let path = path.as_ref();
        let batch = storage::read_table(path)?;
        let space = Self::from_batch(&batch, schema)?;
        info!(
            path = %path.display(),
            points = space.len(),
            known = space.known_indices().len(),
            "loaded search space"
        );
        Ok(space)
    }

    /// Build a pool from a record batch.
    ///
    /// # Errors
    /// Returns error if the label column is missing or any cell is invalid
    pub fn from_batch(batch: &RecordBatch, schema: LabelSchema) -> Result<Self> {
        let raw_labels = storage::integer_column(batch, &schema.target)?;
        let labels = raw_labels
            .into_iter()
            .enumerate()
            .map(|(row, raw)| schema.decode(row, raw))
            .collect::<Result<Vec<_>>>()?;

        let feature_names: Vec<String> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| name != &schema.target)
            .collect();

        let values = feature_matrix(batch, &feature_names)?;
        Self::from_parts(feature_names, values, labels, schema)
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the pool has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Design-variable names, in column order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Raw design-variable matrix (points × variables).
    #[must_use]
    pub const fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Labels in pool order.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Label schema of this pool.
    #[must_use]
    pub const fn schema(&self) -> &LabelSchema {
        &self.schema
    }

    /// View of a single point.
    #[must_use]
    pub fn point(&self, index: usize) -> Option<CandidatePoint<'_>> {
        let label = *self.labels.get(index)?;
        Some(CandidatePoint {
            index,
            values: self.values.row(index),
            label,
        })
    }

    /// Iterate over all points in pool order.
    pub fn points(&self) -> impl Iterator<Item = CandidatePoint<'_>> {
        self.values
            .axis_iter(Axis(0))
            .zip(&self.labels)
            .enumerate()
            .map(|(index, (values, &label))| CandidatePoint {
                index,
                values,
                label,
            })
    }

    /// Indices of labeled points.
    #[must_use]
    pub fn known_indices(&self) -> Vec<usize> {
        self.indices_where(Label::is_known)
    }

    /// Indices of unlabeled points.
    #[must_use]
    pub fn unknown_indices(&self) -> Vec<usize> {
        self.indices_where(|label| !label.is_known())
    }

    fn indices_where(&self, keep: impl Fn(Label) -> bool) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|&(_, &label)| keep(label))
            .map(|(index, _)| index)
            .collect()
    }

    /// Fold validated labels into the pool.
    ///
    /// Rows are matched on every design variable by exact equality. The merge
    /// is all-or-nothing: every row is checked before any label changes.
    ///
    /// # Errors
    /// - `InvalidInput` if the batch lacks a design variable
    /// - `UnknownPoint` if a row matches no pool point
    /// - `InvalidLabel` if a label is the sentinel or undeclared
    pub fn merge_validated(
        &mut self,
        validated: &ValidatedBatch,
        overwrite: bool,
    ) -> Result<MergeReport> {
        let columns = self
            .feature_names
            .iter()
            .map(|name| validated.column_position(name))
            .collect::<Result<Vec<_>>>()?;

        let lookup = self.point_lookup();
        let mut updates = Vec::with_capacity(validated.len());
        for (row, &raw) in validated.labels.iter().enumerate() {
            let values: Vec<f64> = columns
                .iter()
                .map(|&col| validated.values[[row, col]])
                .collect();
            let index = *lookup
                .get(&point_key(values.iter().copied()))
                .ok_or_else(|| Error::UnknownPoint {
                    row,
                    features: render_point(&self.feature_names, &values),
                })?;
            let class = self.schema.decode_validated(row, raw)?;
            updates.push((index, class));
        }

        let mut report = MergeReport::default();
        for (index, class) in updates {
            match self.labels[index] {
                Label::Unknown => {
                    self.labels[index] = Label::Class(class);
                    report.labeled.push(index);
                }
                Label::Class(current) if current == class => report.confirmed.push(index),
                Label::Class(current) if overwrite => {
                    debug!(index, from = current, to = class, "label corrected");
                    self.labels[index] = Label::Class(class);
                    report.corrected.push(index);
                }
                Label::Class(current) => {
                    warn!(
                        index,
                        current,
                        validated = class,
                        "point already labeled, keeping existing label (overwrite disabled)"
                    );
                    report.skipped.push(index);
                }
            }
        }

        info!(
            labeled = report.labeled.len(),
            corrected = report.corrected.len(),
            confirmed = report.confirmed.len(),
            skipped = report.skipped.len(),
            "merged validated points"
        );
        Ok(report)
    }

    fn point_lookup(&self) -> HashMap<Vec<u64>, usize> {
        let mut lookup = HashMap::with_capacity(self.len());
        for (index, row) in self.values.axis_iter(Axis(0)).enumerate() {
            lookup
                .entry(point_key(row.iter().copied()))
                .or_insert(index);
        }
        lookup
    }

    /// Selected rows (design variables + label column) as a record batch.
    ///
    /// # Errors
    /// Returns `InvalidInput` if an index is out of range
    pub fn rows_batch(&self, indices: &[usize]) -> Result<RecordBatch> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(Error::InvalidInput(format!(
                "Index {bad} out of range for a pool of {} points",
                self.len()
            )));
        }
        let mut fields = Vec::with_capacity(self.feature_names.len() + 1);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.feature_names.len() + 1);
        for (col, name) in self.feature_names.iter().enumerate() {
            fields.push(Field::new(name, DataType::Float64, false));
            columns.push(Arc::new(Float64Array::from_iter_values(
                indices.iter().map(|&i| self.values[[i, col]]),
            )));
        }
        fields.push(Field::new(&self.schema.target, DataType::Int64, false));
        columns.push(Arc::new(Int64Array::from_iter_values(
            indices
                .iter()
                .map(|&i| self.labels[i].to_raw(self.schema.unknown)),
        )));
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }

    /// The whole pool as a record batch.
    ///
    /// # Errors
    /// Returns error if the batch cannot be assembled
    pub fn to_batch(&self) -> Result<RecordBatch> {
        let all: Vec<usize> = (0..self.len()).collect();
        self.rows_batch(&all)
    }

    /// Write the pool as CSV.
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        storage::write_csv(path, &self.to_batch()?)
    }
}

/// Lab-validated rows ready to be merged into a pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBatch {
    feature_names: Vec<String>,
    values: Array2<f64>,
    labels: Vec<i64>,
}

impl ValidatedBatch {
    /// Assemble a batch from its parts.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the shapes disagree
    pub fn new(feature_names: Vec<String>, values: Array2<f64>, labels: Vec<i64>) -> Result<Self> {
        if values.ncols() != feature_names.len() || values.nrows() != labels.len() {
            return Err(Error::InvalidInput(format!(
                "Validated batch shape {:?} does not match {} names and {} labels",
                values.dim(),
                feature_names.len(),
                labels.len()
            )));
        }
        Ok(Self {
            feature_names,
            values,
            labels,
        })
    }

    /// Read a validated CSV, dropping every column whose name contains one of
    /// `remove_keys` (identifier columns). A key with no matching column is
    /// treated as already removed.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or holds non-numeric cells
    pub fn read<P: AsRef<Path>>(path: P, target: &str, remove_keys: &[&str]) -> Result<Self> {
        let path = path.as_ref();
        let batch = storage::read_csv(path, storage::ColumnTypes::Infer)?;

        let mut kept = Vec::new();
        let mut removed = BTreeSet::new();
        for field in batch.schema().fields() {
            let name = field.name();
            if remove_keys.iter().any(|key| name.contains(key)) {
                removed.insert(name.clone());
            } else {
                kept.push(name.clone());
            }
        }
        for key in remove_keys {
            if !removed.iter().any(|name| name.contains(key)) {
                debug!(key, "identifier column already removed");
            }
        }

        let batch = Self::from_batch(&batch.project(&kept_positions(&batch, &kept)?)?, target)?;
        info!(path = %path.display(), rows = batch.len(), "read validated points");
        Ok(batch)
    }

    /// Build from a record batch holding design columns and the label column.
    ///
    /// # Errors
    /// Returns error if the label column is missing or a cell is invalid
    pub fn from_batch(batch: &RecordBatch, target: &str) -> Result<Self> {
        let labels = storage::integer_column(batch, target)?;
        let feature_names: Vec<String> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| name != target)
            .collect();
        let values = feature_matrix(batch, &feature_names)?;
        Self::new(feature_names, values, labels)
    }

    /// Number of validated rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Design-variable names.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Raw label codes.
    #[must_use]
    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    /// Write as CSV (design columns + label column).
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn save<P: AsRef<Path>>(&self, path: P, target: &str) -> Result<()> {
        let mut fields = Vec::with_capacity(self.feature_names.len() + 1);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.feature_names.len() + 1);
        for (col, name) in self.feature_names.iter().enumerate() {
            fields.push(Field::new(name, DataType::Float64, false));
            columns.push(Arc::new(Float64Array::from(self.values.column(col).to_vec())));
        }
        fields.push(Field::new(target, DataType::Int64, false));
        columns.push(Arc::new(Int64Array::from(self.labels.clone())));
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        storage::write_csv(path, &batch)
    }

    fn column_position(&self, name: &str) -> Result<usize> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Validated points lack design variable '{name}'"
                ))
            })
    }
}

fn kept_positions(batch: &RecordBatch, kept: &[String]) -> Result<Vec<usize>> {
    kept.iter()
        .map(|name| storage::column_index(batch, name))
        .collect()
}

fn feature_matrix(batch: &RecordBatch, names: &[String]) -> Result<Array2<f64>> {
    let mut values = Array2::zeros((batch.num_rows(), names.len()));
    for (col, name) in names.iter().enumerate() {
        let column = storage::float_column(batch, name)?;
        for (row, value) in column.into_iter().enumerate() {
            values[[row, col]] = value;
        }
    }
    Ok(values)
}

/// Hashable exact-equality key for a feature vector. `-0.0` and `0.0` collide.
pub(crate) fn point_key(values: impl Iterator<Item = f64>) -> Vec<u64> {
    values.map(|v| (v + 0.0).to_bits()).collect()
}

fn render_point(names: &[String], values: &[f64]) -> String {
    names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
