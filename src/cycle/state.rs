//! Cycle Record - provenance of one cycle invocation

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Lifecycle of a cycle invocation.
///
/// ```text
/// Init -> SamplingOnly          -> Labeling -> Persisted   (cycle 0)
/// Init -> ValidatingAndTraining -> Labeling -> Persisted   (cycle > 0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    /// Preconditions checked, pool loaded.
    Init,
    /// Model-free sampling of an unexplored pool.
    SamplingOnly,
    /// Merging validated labels, training and scoring.
    ValidatingAndTraining,
    /// Assigning barcodes to the selection.
    Labeling,
    /// Artifacts written.
    Persisted,
}

impl CycleState {
    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::SamplingOnly | Self::ValidatingAndTraining)
                | (Self::SamplingOnly | Self::ValidatingAndTraining, Self::Labeling)
                | (Self::Labeling, Self::Persisted)
        )
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::SamplingOnly => "sampling_only",
            Self::ValidatingAndTraining => "validating_and_training",
            Self::Labeling => "labeling",
            Self::Persisted => "persisted",
        };
        f.write_str(name)
    }
}

/// Provenance of one cycle: who ran what, when, with which configuration,
/// and what came out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    experiment_id: String,
    cycle: u32,
    state: CycleState,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    config: Value,
    known_at_entry: Vec<usize>,
    selected: Vec<usize>,
    barcodes: Vec<String>,
    crate_version: String,
}

impl CycleRecord {
    /// Create a record in `Init`, stamped now.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, cycle: u32, config: Value) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            cycle,
            state: CycleState::Init,
            started_at: Utc::now(),
            ended_at: None,
            config,
            known_at_entry: Vec::new(),
            selected: Vec::new(),
            barcodes: Vec::new(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the cycle index.
    #[must_use]
    pub const fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> CycleState {
        self.state
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get the end timestamp, once persisted.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Get the configuration snapshot.
    #[must_use]
    pub const fn config(&self) -> &Value {
        &self.config
    }

    /// Known indices when the cycle started training.
    #[must_use]
    pub fn known_at_entry(&self) -> &[usize] {
        &self.known_at_entry
    }

    /// Selected indices.
    #[must_use]
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Barcodes, aligned with [`CycleRecord::selected`].
    #[must_use]
    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// Returns `Other` for a transition the lifecycle does not allow
    pub fn advance(&mut self, next: CycleState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::Other(format!(
                "Cycle {} cannot move from {} to {next}",
                self.cycle, self.state
            )));
        }
        self.state = next;
        if next == CycleState::Persisted {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    pub(crate) fn record_known(&mut self, known: Vec<usize>) {
        self.known_at_entry = known;
    }

    pub(crate) fn record_selection(&mut self, selected: Vec<usize>, barcodes: Vec<String>) {
        self.selected = selected;
        self.barcodes = barcodes;
    }
}
