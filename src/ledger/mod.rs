//! Master ledger: every physically validated point of a campaign
//!
//! The ledger is a flat, all-text table keyed by barcode. It only grows:
//! [`Ledger::append`] adds the rows of a new cycle, [`Ledger::update`] folds
//! lab results into existing rows with combine-first semantics. Nothing is
//! ever deleted.
//!
//! Cells are kept as optional strings (CSV cell semantics) so successive
//! versions never disagree on column types.

pub mod store;

use std::collections::{HashMap, HashSet};

use arrow::record_batch::RecordBatch;
use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::config::PhaseMapping;
use crate::search_space::ValidatedBatch;
use crate::storage;
use crate::{Error, Result};

pub use store::{LedgerStore, WriteMode};

/// Column-major text table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    columns: Vec<String>,
    cells: Vec<Vec<Option<String>>>,
    rows: usize,
}

/// Outcome of [`Ledger::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Ledger rows that received at least one new value.
    pub updated: Vec<usize>,
    /// Update keys with no ledger row.
    pub unmatched: Vec<String>,
    /// Columns introduced by the update.
    pub added_columns: Vec<String>,
}

impl Ledger {
    /// Empty ledger with the given header.
    #[must_use]
    pub fn with_columns(columns: Vec<String>) -> Self {
        let cells = vec![Vec::new(); columns.len()];
        Self {
            columns,
            cells,
            rows: 0,
        }
    }

    /// Ledger from named columns of equal length.
    ///
    /// # Errors
    /// Returns `InvalidInput` on duplicate names or ragged columns
    pub fn from_columns(columns: Vec<(String, Vec<Option<String>>)>) -> Result<Self> {
        let rows = columns.first().map_or(0, |(_, cells)| cells.len());
        let mut seen = HashSet::new();
        for (name, cells) in &columns {
            if !seen.insert(name.as_str()) {
                return Err(Error::InvalidInput(format!("Duplicate ledger column '{name}'")));
            }
            if cells.len() != rows {
                return Err(Error::InvalidInput(format!(
                    "Ledger column '{name}' has {} cells, expected {rows}",
                    cells.len()
                )));
            }
        }
        let (columns, cells) = columns.into_iter().unzip();
        Ok(Self {
            columns,
            cells,
            rows,
        })
    }

    /// Ledger from any record batch; every column is rendered as text.
    ///
    /// # Errors
    /// Returns error if a column cannot be cast to text
    pub fn from_batch(batch: &RecordBatch) -> Result<Self> {
        let columns = batch
            .schema()
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, column)| Ok((field.name().clone(), storage::text_values(column)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::from_columns(columns)
    }

    /// The ledger as an all-`Utf8` record batch.
    ///
    /// # Errors
    /// Returns error if the batch cannot be assembled
    pub fn to_batch(&self) -> Result<RecordBatch> {
        storage::text_batch(&self.columns, self.cells.clone())
    }

    /// Column names, in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows
    }

    /// Whether the ledger has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Cells of a column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[Option<String>]> {
        self.position(name).map(|col| self.cells[col].as_slice())
    }

    /// Single cell.
    #[must_use]
    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        self.column(name)?.get(row)?.as_deref()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn ensure_column(&mut self, name: &str) -> (usize, bool) {
        if let Some(col) = self.position(name) {
            return (col, false);
        }
        self.columns.push(name.to_string());
        self.cells.push(vec![None; self.rows]);
        (self.columns.len() - 1, true)
    }

    /// Append rows, adding any unseen columns ledger-wide. With a
    /// `fill_value`, every empty cell of the result is set to it.
    pub fn append(&mut self, rows: &Self, fill_value: Option<&str>) {
        let mut added = Vec::new();
        for name in &rows.columns {
            if let (_, true) = self.ensure_column(name) {
                added.push(name.clone());
            }
        }
        for (col, name) in self.columns.iter().enumerate() {
            match rows.position(name) {
                Some(src) => self.cells[col].extend(rows.cells[src].iter().cloned()),
                None => self.cells[col].extend(std::iter::repeat(None).take(rows.rows)),
            }
        }
        self.rows += rows.rows;

        if let Some(fill) = fill_value {
            for cell in self.cells.iter_mut().flatten().filter(|c| c.is_none()) {
                *cell = Some(fill.to_string());
            }
        }
        info!(
            appended = rows.rows,
            total = self.rows,
            new_columns = added.len(),
            "appended rows to ledger"
        );
    }

    /// Fold `rows` into matching ledger rows (left join on `key`). A non-empty
    /// update cell replaces the ledger value; an empty one keeps it.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `key` is missing on either side or repeated
    /// in `rows`
    pub fn update(&mut self, rows: &Self, key: &str) -> Result<UpdateReport> {
        let ledger_key = self
            .position(key)
            .ok_or_else(|| Error::InvalidInput(format!("Ledger has no reference column '{key}'")))?;
        let update_key = rows
            .position(key)
            .ok_or_else(|| Error::InvalidInput(format!("Update has no reference column '{key}'")))?;

        let mut by_key: HashMap<&str, usize> = HashMap::with_capacity(rows.rows);
        for (row, value) in rows.cells[update_key].iter().enumerate() {
            let Some(value) = value.as_deref() else {
                continue;
            };
            if by_key.insert(value, row).is_some() {
                return Err(Error::InvalidInput(format!(
                    "Reference key '{value}' appears more than once in the update"
                )));
            }
        }

        let ledger_keys: HashSet<&str> = self.cells[ledger_key]
            .iter()
            .filter_map(Option::as_deref)
            .collect();
        let mut report = UpdateReport {
            unmatched: by_key
                .keys()
                .filter(|k| !ledger_keys.contains(*k))
                .map(|k| (*k).to_string())
                .collect(),
            ..UpdateReport::default()
        };
        report.unmatched.sort();

        let targets: Vec<(usize, usize)> = self.cells[ledger_key]
            .iter()
            .enumerate()
            .filter_map(|(row, value)| Some((row, *by_key.get(value.as_deref()?)?)))
            .collect();

        let mut touched = HashSet::new();
        for (src_col, name) in rows.columns.iter().enumerate() {
            if src_col == update_key {
                continue;
            }
            let (col, added) = self.ensure_column(name);
            if added {
                report.added_columns.push(name.clone());
            }
            for &(row, src_row) in &targets {
                if let Some(value) = &rows.cells[src_col][src_row] {
                    self.cells[col][row] = Some(value.clone());
                    touched.insert(row);
                }
            }
        }
        report.updated = touched.into_iter().collect();
        report.updated.sort_unstable();

        if !report.unmatched.is_empty() {
            warn!(keys = ?report.unmatched, "update rows with no ledger entry were ignored");
        }
        info!(
            updated = report.updated.len(),
            new_columns = report.added_columns.len(),
            "updated ledger"
        );
        Ok(report)
    }

    /// Rows whose `key` is one of `identifiers`, projected on the design
    /// `columns` and `target`, with raw target codes remapped by `mapping`.
    ///
    /// # Errors
    /// - `InvalidInput` if a column is missing or a design cell is not numeric
    /// - `InvalidLabel` if a target code is empty or has no mapping
    pub fn extract_validated(
        &self,
        identifiers: &[String],
        key: &str,
        columns: &[String],
        target: &str,
        mapping: &PhaseMapping,
    ) -> Result<ValidatedBatch> {
        let keys = self
            .column(key)
            .ok_or_else(|| Error::InvalidInput(format!("Ledger has no column '{key}'")))?;
        let wanted: HashSet<&str> = identifiers.iter().map(String::as_str).collect();
        let rows: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(_, value)| value.as_deref().is_some_and(|v| wanted.contains(v)))
            .map(|(row, _)| row)
            .collect();
        if rows.len() < wanted.len() {
            warn!(
                requested = wanted.len(),
                found = rows.len(),
                "some identifiers are not in the ledger"
            );
        }

        let mut values = Array2::zeros((rows.len(), columns.len()));
        for (col, name) in columns.iter().enumerate() {
            let cells = self
                .column(name)
                .ok_or_else(|| Error::InvalidInput(format!("Ledger has no column '{name}'")))?;
            for (i, &row) in rows.iter().enumerate() {
                values[[i, col]] = parse_cell(cells[row].as_deref(), name, row)?;
            }
        }

        let codes = self
            .column(target)
            .ok_or_else(|| Error::InvalidInput(format!("Ledger has no column '{target}'")))?;
        let labels = rows
            .iter()
            .map(|&row| {
                let raw = codes[row].as_deref().unwrap_or_default();
                mapping.map(raw).ok_or_else(|| Error::InvalidLabel {
                    row,
                    label: raw.to_string(),
                    expected: mapping.codes(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(rows = rows.len(), "extracted validated rows");
        ValidatedBatch::new(columns.to_vec(), values, labels)
    }
}

fn parse_cell(cell: Option<&str>, column: &str, row: usize) -> Result<f64> {
    cell.and_then(|c| c.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "Ledger column '{column}' row {row}: {cell:?} is not a number"
            ))
        })
}
