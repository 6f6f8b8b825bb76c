//! Cycle configuration and campaign layout
//!
//! A [`CycleConfig`] is read once per invocation from YAML or JSON, validated,
//! and snapshotted verbatim into the cycle's provenance file. All file names
//! are derived from a [`CampaignPaths`] value built from the command line.
//!
//! ```text
//! <experiment_dir>/
//!   dataset/                       pool files
//!   cycles/cycle_<n>/              <experiment>_cycle<n>_* artifacts
//! <master_dir>/
//!   master_file_version_<v>.csv    ledger versions
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acquisition::{DecisionFunction, SamplingMode};
use crate::classifier::ClassifierSpec;
use crate::identifier::IdentifierMode;
use crate::search_space::LabelSchema;
use crate::{Error, Result};

/// Everything one cycle invocation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Campaign identifier, used as the artifact file prefix.
    #[serde(alias = "experimentID")]
    pub experiment_id: String,
    /// Cycle index.
    #[serde(alias = "cycle_number")]
    pub cycle: u32,
    /// Pool file; relative paths resolve against the dataset directory.
    ///
    /// Labels merged in a cycle are only carried forward if the next cycle
    /// points this at the previous `<prefix>_search_space.csv` snapshot.
    /// Otherwise every cycle starts again from the original pool.
    #[serde(alias = "search_space_dataset")]
    pub search_space: PathBuf,
    /// Lab-validated points of the previous cycle; relative paths resolve
    /// against that cycle's directory.
    #[serde(default, alias = "validated_dataset")]
    pub validated: Option<PathBuf>,
    /// Points to select.
    #[serde(alias = "new_points_batch")]
    pub batch_size: usize,
    /// Classifier used from cycle 1 on.
    #[serde(default)]
    pub classifier: ClassifierSpec,
    /// Scoring rule used from cycle 1 on.
    #[serde(default)]
    pub acquisition: DecisionFunction,
    /// Cycle-0 sampler.
    #[serde(default, alias = "sampling_mode")]
    pub sampling: SamplingMode,
    /// Seed for sampling and tie-breaking.
    #[serde(default)]
    pub seed: u64,
    /// Barcode scheme.
    #[serde(default)]
    pub identifier: IdentifierMode,
    /// Label column, unknown sentinel and classes.
    #[serde(default)]
    pub labels: LabelSchema,
    /// Name of the barcode column in output and lab files.
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
    /// Standardise features before training.
    #[serde(default = "default_true")]
    pub scale_features: bool,
    /// Let validated labels replace known pool labels.
    #[serde(default = "default_true")]
    pub overwrite_labels: bool,
}

fn default_identifier_column() -> String {
    "Barcode".to_string()
}

const fn default_true() -> bool {
    true
}

impl CycleConfig {
    /// Read a YAML (`.yaml`/`.yml`) or JSON (`.json`) config and validate it.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or fails validation
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = read_document(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Configuration` (or `KernelSpec`) describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.experiment_id.is_empty()
            || self.experiment_id.contains(['/', '\\'])
        {
            return Err(Error::Configuration(format!(
                "Invalid experiment id '{}'",
                self.experiment_id
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be positive".to_string()));
        }
        if self.labels.classes.len() < 2 {
            return Err(Error::Configuration(format!(
                "At least two classes must be declared, got {:?}",
                self.labels.classes
            )));
        }
        if self.labels.classes.contains(&self.labels.unknown) {
            return Err(Error::Configuration(format!(
                "Unknown sentinel {} is also a declared class",
                self.labels.unknown
            )));
        }
        if self.identifier_column.is_empty() || self.identifier_column == self.labels.target {
            return Err(Error::Configuration(format!(
                "Identifier column '{}' must be non-empty and differ from the label column",
                self.identifier_column
            )));
        }
        self.classifier.validate()
    }

    /// The configuration as JSON, for provenance.
    ///
    /// # Errors
    /// Returns error if serialisation fails
    pub fn snapshot(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Deserialise a YAML (`.yaml`/`.yml`) or JSON (`.json`) document.
///
/// # Errors
/// Returns `Configuration` for other extensions, or the parse error
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Ok(serde_yaml::from_str(&text)?),
        Some("json") => Ok(serde_json::from_str(&text)?),
        other => Err(Error::Configuration(format!(
            "Unsupported config format {other:?} for {} (expected .yaml, .yml or .json)",
            path.display()
        ))),
    }
}

/// Files a cycle writes, keyed by suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// Selected points with barcodes.
    OutputPoints,
    /// Positional indices of the selected points.
    Indices,
    /// Barcodes only.
    Barcodes,
    /// Full-pool probability matrix.
    Probabilities,
    /// Fitted classifier.
    Model,
    /// Provenance record.
    Config,
    /// Pool after merging validated labels.
    SearchSpace,
    /// Validated points extracted from the ledger for the next cycle.
    Validated,
}

impl Artifact {
    /// File-name suffix after `<experiment>_cycle<n>`.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::OutputPoints => "_output_points.csv",
            Self::Indices => "_output_points.ndx",
            Self::Barcodes => "_output_barcodes.csv",
            Self::Probabilities => "_output_points_pdf.npy",
            Self::Model => "_output_algorithm.json",
            Self::Config => "_config_file.json",
            Self::SearchSpace => "_search_space.csv",
            Self::Validated => "_validated_points.csv",
        }
    }
}

/// Directory layout of one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPaths {
    experiment_dir: PathBuf,
    master_dir: PathBuf,
}

impl CampaignPaths {
    /// Layout rooted at `experiment_dir`, with ledger versions in `master_dir`.
    #[must_use]
    pub fn new(experiment_dir: impl Into<PathBuf>, master_dir: impl Into<PathBuf>) -> Self {
        Self {
            experiment_dir: experiment_dir.into(),
            master_dir: master_dir.into(),
        }
    }

    /// Campaign root.
    #[must_use]
    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    /// Ledger directory.
    #[must_use]
    pub fn master_dir(&self) -> &Path {
        &self.master_dir
    }

    /// Pool directory.
    #[must_use]
    pub fn dataset_dir(&self) -> PathBuf {
        self.experiment_dir.join("dataset")
    }

    /// Directory of cycle `n`.
    #[must_use]
    pub fn cycle_dir(&self, cycle: u32) -> PathBuf {
        self.experiment_dir
            .join("cycles")
            .join(format!("cycle_{cycle}"))
    }

    /// `<experiment>_cycle<n>`
    #[must_use]
    pub fn prefix(experiment_id: &str, cycle: u32) -> String {
        format!("{experiment_id}_cycle{cycle}")
    }

    /// Full path of an artifact.
    #[must_use]
    pub fn artifact(&self, experiment_id: &str, cycle: u32, artifact: Artifact) -> PathBuf {
        self.cycle_dir(cycle).join(format!(
            "{}{}",
            Self::prefix(experiment_id, cycle),
            artifact.suffix()
        ))
    }

    /// Resolve the configured pool path.
    #[must_use]
    pub fn search_space(&self, config: &CycleConfig) -> PathBuf {
        resolve(&self.dataset_dir(), &config.search_space)
    }

    /// Resolve the configured validated path, which lives next to the
    /// previous cycle's artifacts.
    #[must_use]
    pub fn validated(&self, config: &CycleConfig) -> Option<PathBuf> {
        let previous = self.cycle_dir(config.cycle.saturating_sub(1));
        config
            .validated
            .as_ref()
            .map(|path| resolve(&previous, path))
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Fixed lookup from raw lab label codes to class indices.
///
/// An empty mapping parses integer codes as-is (`"1"` and `"1.0"` both map to 1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseMapping(BTreeMap<String, i64>);

impl PhaseMapping {
    /// Mapping from explicit pairs.
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Read a mapping from a JSON object file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not a string -> integer object
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Class index for a raw code.
    #[must_use]
    pub fn map(&self, raw: &str) -> Option<i64> {
        let raw = raw.trim();
        if self.0.is_empty() {
            return parse_integer(raw);
        }
        self.0.get(raw).copied()
    }

    /// Distinct class indices the mapping can produce.
    #[must_use]
    pub fn codes(&self) -> Vec<i64> {
        let mut codes: Vec<i64> = self.0.values().copied().collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    let code = (value.is_finite() && value.fract() == 0.0).then_some(value as i64);
    code
}
