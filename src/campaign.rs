//! Campaign-level ledger operations
//!
//! Glue between a cycle directory and the versioned ledger: register a
//! cycle's selection, fold the lab's results in, and extract the validated
//! points the next cycle merges into its pool.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{Artifact, CampaignPaths, PhaseMapping};
use crate::ledger::{Ledger, LedgerStore, UpdateReport, WriteMode};
use crate::storage::{self, ColumnTypes};
use crate::{Error, Result};

/// Column tagging every ledger row with its campaign.
pub const EXPERIMENT_COLUMN: &str = "Experiment_ID";

/// File-name fragment of lab result tables.
pub const LAB_RESULTS_PATTERN: &str = "lab_results";

/// First file (in name order) in `dir` whose name contains `fragment` and
/// ends with `.{extension}`.
///
/// # Errors
/// Returns `MissingArtifact` if nothing matches or `dir` does not exist
pub fn find_artifact(dir: &Path, fragment: &str, extension: &str) -> Result<PathBuf> {
    let missing = || Error::MissingArtifact {
        dir: dir.to_path_buf(),
        pattern: format!("*{fragment}*.{extension}"),
    };
    let entries = fs::read_dir(dir).map_err(|_| missing())?;
    let mut matches = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let name_matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(fragment));
        let extension_matches = path.extension().and_then(|e| e.to_str()) == Some(extension);
        if path.is_file() && name_matches && extension_matches {
            matches.push(path);
        }
    }
    matches.sort();
    matches.into_iter().next().ok_or_else(missing)
}

/// Ledger operations for one campaign.
#[derive(Debug, Clone)]
pub struct Campaign {
    paths: CampaignPaths,
    experiment_id: String,
    key: String,
}

impl Campaign {
    /// Campaign `experiment_id` whose ledger rows are keyed by `key` (the barcode column).
    #[must_use]
    pub fn new(paths: CampaignPaths, experiment_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            paths,
            experiment_id: experiment_id.into(),
            key: key.into(),
        }
    }

    /// The versioned ledger.
    #[must_use]
    pub fn store(&self) -> LedgerStore {
        LedgerStore::new(self.paths.master_dir())
    }

    /// Append the selected points of `cycle` to a new ledger version.
    ///
    /// # Errors
    /// Returns `MissingArtifact` if the cycle has no selected-points table
    pub fn append_cycle(&self, cycle: u32, fill_value: Option<&str>) -> Result<u64> {
        let dir = self.paths.cycle_dir(cycle);
        let path = find_artifact(&dir, "output_points", "csv")?;
        let batch = storage::read_csv(&path, ColumnTypes::Text)?;
        let mut rows = Ledger::from_batch(&batch)?;
        let tag = Ledger::from_columns(vec![(
            EXPERIMENT_COLUMN.to_string(),
            vec![Some(self.experiment_id.clone()); rows.len()],
        )])?;
        rows = merge_columns(rows, tag)?;

        let (version, ()) = self.store().read_modify_write(WriteMode::NextVersion, |ledger| {
            ledger.append(&rows, fill_value);
            Ok(())
        })?;
        info!(cycle, version, rows = rows.len(), path = %path.display(), "registered cycle in ledger");
        Ok(version)
    }

    /// Fold the lab results of `cycle` into the latest ledger version.
    ///
    /// # Errors
    /// Returns `MissingArtifact` if the cycle has no lab results table
    pub fn update_from_lab(&self, cycle: u32) -> Result<(u64, UpdateReport)> {
        let dir = self.paths.cycle_dir(cycle);
        let path = find_artifact(&dir, LAB_RESULTS_PATTERN, "csv")?;
        let results = Ledger::from_batch(&storage::read_csv(&path, ColumnTypes::Text)?)?;
        let (version, report) = self
            .store()
            .read_modify_write(WriteMode::InPlace, |ledger| ledger.update(&results, &self.key))?;
        info!(cycle, version, path = %path.display(), "folded lab results into ledger");
        Ok((version, report))
    }

    /// Extract the validated points of `cycle` and write them next to the
    /// cycle's other artifacts, ready for cycle `cycle + 1`.
    ///
    /// # Errors
    /// - `MissingArtifact` if the cycle has no barcodes file
    /// - `InvalidLabel` if a result code has no mapping
    pub fn extract_cycle_validated(
        &self,
        cycle: u32,
        design_columns: &[String],
        target: &str,
        mapping: &PhaseMapping,
    ) -> Result<PathBuf> {
        let dir = self.paths.cycle_dir(cycle);
        let barcodes_path = find_artifact(&dir, "output_barcodes", "csv")?;
        let barcodes: Vec<String> =
            storage::text_column(&storage::read_csv(&barcodes_path, ColumnTypes::Text)?, &self.key)?
                .into_iter()
                .flatten()
                .collect();

        let (_, ledger) = self.store().load_latest()?;
        let validated = ledger.extract_validated(&barcodes, &self.key, design_columns, target, mapping)?;

        let out = self.paths.artifact(&self.experiment_id, cycle, Artifact::Validated);
        validated.save(&out, target)?;
        info!(cycle, rows = validated.len(), path = %out.display(), "extracted validated points");
        Ok(out)
    }
}

fn merge_columns(left: Ledger, right: Ledger) -> Result<Ledger> {
    let columns = left
        .columns()
        .iter()
        .chain(right.columns())
        .map(|name| {
            let cells = left
                .column(name)
                .or_else(|| right.column(name))
                .map(<[Option<String>]>::to_vec)
                .unwrap_or_default();
            (name.clone(), cells)
        })
        .collect();
    Ledger::from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_artifact_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("e_cycle0_output_points.ndx"), "1\n").unwrap();
        fs::write(dir.path().join("e_cycle0_output_points_pdf.npy"), "").unwrap();
        assert!(matches!(
            find_artifact(dir.path(), "output_points", "csv"),
            Err(Error::MissingArtifact { .. })
        ));
        fs::write(dir.path().join("e_cycle0_output_points.csv"), "x\n1\n").unwrap();
        let found = find_artifact(dir.path(), "output_points", "csv").unwrap();
        assert!(found.ends_with("e_cycle0_output_points.csv"));
    }

    #[test]
    fn test_missing_directory_is_missing_artifact() {
        let err = find_artifact(Path::new("/nonexistent/cycle_9"), "lab_results", "csv").unwrap_err();
        assert!(err.to_string().contains("*lab_results*.csv"));
    }
}
