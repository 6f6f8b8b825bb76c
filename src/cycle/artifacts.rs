//! Best-effort all-or-nothing artifact persistence
//!
//! An [`ArtifactWriter`] stages every file in a hidden directory next to the
//! cycle directory. [`ArtifactWriter::commit`] moves the staged set into
//! place, provenance config last. Dropping the writer uncommitted discards
//! the staging directory, so a failed run never touches the artifacts of an
//! earlier successful run of the same cycle.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::record_batch::RecordBatch;
use ndarray::Array2;
use ndarray_npy::write_npy;
use serde::Serialize;
use tempfile::TempDir;
use tracing::debug;

use crate::storage;
use crate::{Error, Result};

/// Stages the files of one cycle invocation.
#[derive(Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
    staging: TempDir,
    staged: Vec<String>,
    committed: bool,
}

impl ArtifactWriter {
    /// Writer targeting `dir`. Only its parent is created here; `dir` itself
    /// appears on commit.
    ///
    /// # Errors
    /// Returns `StorageError` if the parent or the staging directory cannot
    /// be created
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let parent = dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&parent).map_err(|e| {
            Error::StorageError(format!("Failed to create {}: {e}", parent.display()))
        })?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&parent)
            .map_err(|e| {
                Error::StorageError(format!("Failed to stage artifacts in {}: {e}", parent.display()))
            })?;
        Ok(Self {
            dir,
            staging,
            staged: Vec::new(),
            committed: false,
        })
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final paths of the files staged so far.
    #[must_use]
    pub fn pending(&self) -> Vec<PathBuf> {
        self.staged.iter().map(|name| self.dir.join(name)).collect()
    }

    /// Write a record batch as CSV.
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn table(&mut self, name: &str, batch: &RecordBatch) -> Result<PathBuf> {
        let path = self.stage(name);
        storage::write_csv(&path, batch)?;
        Ok(path)
    }

    /// Write a single text column as CSV.
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn column(&mut self, name: &str, header: &str, values: &[String]) -> Result<PathBuf> {
        let cells = vec![values.iter().cloned().map(Some).collect()];
        let batch = storage::text_batch(&[header.to_string()], cells)?;
        self.table(name, &batch)
    }

    /// Write positional indices, one per line.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be written
    pub fn indices(&mut self, name: &str, indices: &[usize]) -> Result<PathBuf> {
        let path = self.stage(name);
        let mut out = BufWriter::new(File::create(&path)?);
        for index in indices {
            writeln!(out, "{index}")?;
        }
        out.flush()?;
        Ok(path)
    }

    /// Write a matrix in `.npy` format.
    ///
    /// # Errors
    /// Returns `Npy` if the file cannot be written
    pub fn matrix(&mut self, name: &str, matrix: &Array2<f64>) -> Result<PathBuf> {
        let path = self.stage(name);
        write_npy(&path, matrix)?;
        Ok(path)
    }

    /// Write any serialisable value as pretty JSON.
    ///
    /// # Errors
    /// Returns error if the file cannot be written or serialisation fails
    pub fn json<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.stage(name);
        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, value)?;
        out.flush()?;
        Ok(path)
    }

    /// Move every staged file into the target directory, in write order, and
    /// return their final paths. Existing files of the same name are replaced.
    ///
    /// Every target is checked before the first move; a rename failing part
    /// way leaves the remaining files staged and discarded.
    ///
    /// # Errors
    /// Returns `StorageError` if a target is a directory or a move fails
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::StorageError(format!("Failed to create cycle directory {}: {e}", self.dir.display()))
        })?;
        let targets = self.pending();
        if let Some(blocked) = targets.iter().find(|target| target.is_dir()) {
            return Err(Error::StorageError(format!(
                "Artifact target {} is a directory",
                blocked.display()
            )));
        }
        for (name, target) in self.staged.iter().zip(&targets) {
            fs::rename(self.staging.path().join(name), target).map_err(|e| {
                Error::StorageError(format!("Failed to move artifact to {}: {e}", target.display()))
            })?;
        }
        self.committed = true;
        Ok(targets)
    }

    fn stage(&mut self, name: &str) -> PathBuf {
        if !self.staged.iter().any(|staged| staged == name) {
            self.staged.push(name.to_string());
        }
        self.staging.path().join(name)
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if !self.committed && !self.staged.is_empty() {
            debug!(
                dir = %self.dir.display(),
                files = self.staged.len(),
                "discarding uncommitted artifacts"
            );
        }
    }
}

/// Append a text column to a batch.
///
/// # Errors
/// Returns error if the column length differs from the batch row count
pub fn with_text_column(batch: &RecordBatch, name: &str, values: &[String]) -> Result<RecordBatch> {
    let column: ArrayRef = Arc::new(StringArray::from_iter_values(values));
    storage::with_column(batch, name, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_npy::read_npy;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_commit_moves_files_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cycle_0");
        let mut writer = ArtifactWriter::create(&target).unwrap();
        writer.indices("a.ndx", &[4, 0, 2]).unwrap();
        writer.matrix("a.npy", &array![[0.25, 0.75]]).unwrap();
        assert!(!target.exists());

        let kept = writer.commit().unwrap();
        assert_eq!(kept, vec![target.join("a.ndx"), target.join("a.npy")]);
        assert_eq!(fs::read_to_string(&kept[0]).unwrap(), "4\n0\n2\n");
        let back: Array2<f64> = read_npy(&kept[1]).unwrap();
        assert_eq!(back, array![[0.25, 0.75]]);
        // staging directory is gone
        assert_eq!(entries(dir.path()), vec!["cycle_0".to_string()]);
    }

    #[test]
    fn test_drop_without_commit_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cycle_1");
        {
            let mut writer = ArtifactWriter::create(&target).unwrap();
            let staged = writer.json("config.json", &serde_json::json!({"cycle": 1})).unwrap();
            assert!(staged.exists());
            assert_eq!(writer.pending(), vec![target.join("config.json")]);
        }
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_failed_write_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cycle_2");
        let mut writer = ArtifactWriter::create(&target).unwrap();
        writer.column("codes.csv", "Barcode", &["A1".to_string()]).unwrap();
        assert!(writer.indices("missing/sub/x.ndx", &[1]).is_err());
        drop(writer);
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_commit_replaces_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cycle_0");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("a.ndx"), "9\n").unwrap();
        fs::write(target.join("lab_results.csv"), "Barcode\n").unwrap();

        let mut writer = ArtifactWriter::create(&target).unwrap();
        writer.indices("a.ndx", &[1]).unwrap();
        writer.commit().unwrap();
        assert_eq!(fs::read_to_string(target.join("a.ndx")).unwrap(), "1\n");
        assert!(target.join("lab_results.csv").exists());
    }

    #[test]
    fn test_blocked_target_moves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cycle_0");
        fs::create_dir_all(target.join("b.ndx")).unwrap();
        fs::write(target.join("a.ndx"), "9\n").unwrap();

        let mut writer = ArtifactWriter::create(&target).unwrap();
        writer.indices("a.ndx", &[1]).unwrap();
        writer.indices("b.ndx", &[2]).unwrap();
        assert!(matches!(writer.commit(), Err(Error::StorageError(_))));
        assert_eq!(fs::read_to_string(target.join("a.ndx")).unwrap(), "9\n");
        assert_eq!(entries(dir.path()), vec!["cycle_0".to_string()]);
    }
}
