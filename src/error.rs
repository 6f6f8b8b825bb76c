//! Error types for doe-navigator
//!
//! Every variant is fatal for the current cycle invocation. Nothing in the
//! crate retries: a human-paced campaign must be able to trace every failure
//! back to the input that caused it.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// doe-navigator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Cycle or validation-set precondition violated
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validated row has no matching point in the search space
    #[error("Unknown point: validated row {row} matches no point in the search space ({features})")]
    UnknownPoint {
        /// Row position inside the validated batch
        row: usize,
        /// Rendered feature values of the offending row
        features: String,
    },

    /// Label is the unknown sentinel or outside the declared class set
    #[error("Invalid label {label} at row {row}: expected one of {expected:?}")]
    InvalidLabel {
        /// Row position of the offending label
        row: usize,
        /// Raw label value
        label: String,
        /// Declared classes
        expected: Vec<i64>,
    },

    /// Barcode generator produced a duplicate inside one batch
    #[error("Identifier collision: '{0}' was generated twice in the same batch\nThis points at a generator defect; the batch was not written.")]
    IdentifierCollision(String),

    /// Expected upstream artifact is absent
    #[error("Missing artifact: expected {pattern} in {}", dir.display())]
    MissingArtifact {
        /// Directory searched
        dir: PathBuf,
        /// File name or pattern expected
        pattern: String,
    },

    /// Kernel expression could not be parsed
    #[error("Kernel spec error: {0}")]
    KernelSpec(String),

    /// Classifier failed numerically or was used before fitting
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (CSV/Parquet)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `.npy` read/write error
    #[error("NPY error: {0}")]
    Npy(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<ndarray_npy::WriteNpyError> for Error {
    fn from(err: ndarray_npy::WriteNpyError) -> Self {
        Self::Npy(err.to_string())
    }
}

impl From<ndarray_npy::ReadNpyError> for Error {
    fn from(err: ndarray_npy::ReadNpyError) -> Self {
        Self::Npy(err.to_string())
    }
}
