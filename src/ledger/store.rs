//! Versioned ledger store
//!
//! Versions live side by side as `master_file_version_<n>.csv`. Appending new
//! rows writes version `n + 1`; folding lab results into existing rows
//! rewrites version `n` in place. Older versions are never touched.
//!
//! The store does no locking. Two writers running at once can lose updates;
//! invocations must be serialised by whoever runs the campaign.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::Ledger;
use crate::storage::{self, ColumnTypes};
use crate::{Error, Result};

const FILE_PREFIX: &str = "master_file_version_";
const FILE_SUFFIX: &str = ".csv";

/// Where a mutated ledger is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// New version `latest + 1`; the target must not exist yet.
    NextVersion,
    /// Overwrite the latest version.
    InPlace,
}

/// Directory of ledger versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    /// Store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ledger directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path of a version.
    #[must_use]
    pub fn version_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{version}{FILE_SUFFIX}"))
    }

    /// Existing versions, in numeric order.
    ///
    /// # Errors
    /// Returns `Io` if the directory cannot be listed
    pub fn versions(&self) -> Result<Vec<u64>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            if let Some(version) = name.to_str().and_then(parse_version) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Read one version. An empty file is an empty ledger.
    ///
    /// # Errors
    /// Returns error if the file cannot be read
    pub fn read(&self, version: u64) -> Result<Ledger> {
        let path = self.version_path(version);
        if fs::metadata(&path)?.len() == 0 {
            return Ok(Ledger::default());
        }
        Ledger::from_batch(&storage::read_csv(&path, ColumnTypes::Text)?)
    }

    /// Latest version and its contents; an empty store gets version 0.
    ///
    /// # Errors
    /// Returns error if the directory or the file cannot be accessed
    pub fn load_latest(&self) -> Result<(u64, Ledger)> {
        if let Some(&latest) = self.versions()?.last() {
            return Ok((latest, self.read(latest)?));
        }
        fs::create_dir_all(&self.dir)?;
        let ledger = Ledger::default();
        self.write(0, &ledger)?;
        info!(path = %self.version_path(0).display(), "created empty ledger");
        Ok((0, ledger))
    }

    /// Load the latest version, apply `mutate`, and write the result.
    ///
    /// # Errors
    /// - any error returned by `mutate` (nothing is written)
    /// - `StorageError` if `NextVersion` would overwrite an existing file
    pub fn read_modify_write<T, F>(&self, mode: WriteMode, mutate: F) -> Result<(u64, T)>
    where
        F: FnOnce(&mut Ledger) -> Result<T>,
    {
        let (latest, mut ledger) = self.load_latest()?;
        let output = mutate(&mut ledger)?;

        let version = match mode {
            WriteMode::NextVersion => latest + 1,
            WriteMode::InPlace => latest,
        };
        if mode == WriteMode::NextVersion && self.version_path(version).exists() {
            return Err(Error::StorageError(format!(
                "Ledger version {} already exists",
                self.version_path(version).display()
            )));
        }
        self.write(version, &ledger)?;
        info!(version, rows = ledger.len(), ?mode, "saved ledger");
        Ok((version, output))
    }

    fn write(&self, version: u64, ledger: &Ledger) -> Result<()> {
        let path = self.version_path(version);
        if ledger.columns().is_empty() {
            fs::write(&path, "")?;
            return Ok(());
        }
        storage::write_csv(&path, &ledger.to_batch()?)
    }
}

fn parse_version(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}
