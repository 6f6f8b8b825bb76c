//! Cycle controller
//!
//! One invocation runs one cycle end-to-end:
//!
//! ```text
//! Init ─┬─ cycle 0 ─► SamplingOnly ──────────┬─► Labeling ─► Persisted
//!       └─ cycle n ─► ValidatingAndTraining ─┘
//! ```
//!
//! The controller never shares state between invocations. Everything it needs
//! comes from a [`CycleConfig`] and a [`CampaignPaths`]; everything it produces
//! is written to the cycle directory. Concurrent invocations against the same
//! campaign are not supported.

pub mod artifacts;
pub mod state;

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::acquisition::{AcquisitionResult, DiversitySampler, UncertaintySampler};
use crate::classifier::Classifier;
use crate::config::{Artifact, CampaignPaths, CycleConfig};
use crate::features::build_features;
use crate::identifier::{assign_barcodes, BarcodeGenerator};
use crate::search_space::{MergeReport, SearchSpace, ValidatedBatch};
use crate::{Error, Result};

pub use artifacts::ArtifactWriter;
pub use state::{CycleRecord, CycleState};

/// Check the cycle-index / validated-data combination.
///
/// # Errors
/// Returns `Configuration` if cycle 0 receives validated data, or a cycle
/// after the first receives none
pub fn check_preconditions(cycle: u32, has_validated: bool) -> Result<()> {
    match (cycle, has_validated) {
        (0, true) => Err(Error::Configuration(
            "Cycle 0 samples an unexplored search space and cannot take validated points"
                .to_string(),
        )),
        (c, false) if c > 1 => Err(Error::Configuration(format!(
            "Cycle {c} requires the validated points of cycle {}",
            c - 1
        ))),
        _ => Ok(()),
    }
}

/// Selection made by a cycle, before persistence.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Pool after merging validated points.
    pub pool: SearchSpace,
    /// Chosen indices and, for model-based cycles, probabilities.
    pub acquisition: AcquisitionResult,
    /// Fitted model dump (model-based cycles only).
    pub model: Option<Value>,
    /// What the merge changed (when validated points were given).
    pub merge: Option<MergeReport>,
}

/// A finished cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Provenance record, in state `Persisted`.
    pub record: CycleRecord,
    /// What was selected.
    pub selection: Selection,
    /// Barcodes, aligned with `selection.acquisition.indices`.
    pub barcodes: Vec<String>,
    /// Artifacts written.
    pub artifacts: Vec<PathBuf>,
}

/// Drives one cycle.
#[derive(Debug, Clone)]
pub struct CycleController {
    config: CycleConfig,
    paths: CampaignPaths,
}

impl CycleController {
    /// Controller for a validated configuration.
    ///
    /// # Errors
    /// Returns `Configuration` if the configuration is invalid
    pub fn new(config: CycleConfig, paths: CampaignPaths) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, paths })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Campaign layout in use.
    #[must_use]
    pub const fn paths(&self) -> &CampaignPaths {
        &self.paths
    }

    /// Run the cycle with the configured barcode scheme.
    ///
    /// # Errors
    /// Returns the first error of any stage; nothing is left on disk on failure
    pub fn run(&self) -> Result<CycleOutcome> {
        let mut generator = self.config.identifier.generator();
        self.run_with(generator.as_mut())
    }

    /// Run the cycle with an explicit barcode generator.
    ///
    /// # Errors
    /// Returns the first error of any stage; nothing is left on disk on failure
    pub fn run_with(&self, generator: &mut dyn BarcodeGenerator) -> Result<CycleOutcome> {
        let mut record =
            CycleRecord::new(&self.config.experiment_id, self.config.cycle, self.config.snapshot()?);
        info!(
            experiment = %self.config.experiment_id,
            cycle = self.config.cycle,
            batch_size = self.config.batch_size,
            "starting cycle"
        );

        let validated_path = self.paths.validated(&self.config);
        check_preconditions(self.config.cycle, validated_path.is_some())?;

        let pool = SearchSpace::load(self.paths.search_space(&self.config), self.config.labels.clone())?;
        let validated = validated_path
            .map(|path| self.read_validated(&path))
            .transpose()?;

        let selection = self.select(pool, validated.as_ref(), &mut record)?;
        let barcodes = self.label(&selection, generator, &mut record)?;
        let artifacts = self.persist(&selection, &barcodes, &mut record)?;

        Ok(CycleOutcome {
            record,
            selection,
            barcodes,
            artifacts,
        })
    }

    fn read_validated(&self, path: &Path) -> Result<ValidatedBatch> {
        if !path.exists() {
            return Err(Error::MissingArtifact {
                dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                pattern: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            });
        }
        ValidatedBatch::read(
            path,
            &self.config.labels.target,
            &[self.config.identifier_column.as_str()],
        )
    }

    /// Merge, train and select, in memory.
    ///
    /// # Errors
    /// - `Configuration` for a broken cycle precondition
    /// - merge, classifier and acquisition errors
    pub fn select(
        &self,
        mut pool: SearchSpace,
        validated: Option<&ValidatedBatch>,
        record: &mut CycleRecord,
    ) -> Result<Selection> {
        let cycle = self.config.cycle;
        check_preconditions(cycle, validated.is_some())?;

        if cycle == 0 {
            record.advance(CycleState::SamplingOnly)?;
            let features = build_features(&pool, self.config.scale_features)?;
            let sampler = DiversitySampler::new(self.config.sampling, self.config.seed);
            let acquisition = sampler.sample(&features, self.config.batch_size)?;
            return Ok(Selection {
                pool,
                acquisition,
                model: None,
                merge: None,
            });
        }

        record.advance(CycleState::ValidatingAndTraining)?;
        let merge = match validated {
            Some(batch) => Some(pool.merge_validated(batch, self.config.overwrite_labels)?),
            None => {
                info!(cycle, "no validated points given, using labels already in the pool");
                None
            }
        };
        if let Some(report) = merge.as_ref().filter(|r| !r.skipped.is_empty()) {
            warn!(skipped = report.skipped.len(), "validated labels ignored for known points");
        }
        record.record_known(pool.known_indices());

        let features = build_features(&pool, self.config.scale_features)?;
        let mut classifier = self.config.classifier.build();
        info!(model = self.config.classifier.kind(), "training classifier");
        let sampler = UncertaintySampler::new(self.config.acquisition, self.config.seed);
        let acquisition = sampler.select(&features, &mut classifier, self.config.batch_size)?;

        let model = Some(classifier.to_json()?);
        Ok(Selection {
            pool,
            acquisition,
            model,
            merge,
        })
    }

    /// Assign barcodes to the selection.
    ///
    /// # Errors
    /// Returns `IdentifierCollision` if the generator repeats itself
    pub fn label(
        &self,
        selection: &Selection,
        generator: &mut dyn BarcodeGenerator,
        record: &mut CycleRecord,
    ) -> Result<Vec<String>> {
        record.advance(CycleState::Labeling)?;
        let indices = &selection.acquisition.indices;
        let barcodes = assign_barcodes(generator, indices.len())?;
        record.record_selection(indices.clone(), barcodes.clone());
        Ok(barcodes)
    }

    /// Write every artifact of the cycle, or none.
    ///
    /// # Errors
    /// Returns the first write or commit error; staged files are discarded
    /// and artifacts of an earlier run stay as they were
    pub fn persist(
        &self,
        selection: &Selection,
        barcodes: &[String],
        record: &mut CycleRecord,
    ) -> Result<Vec<PathBuf>> {
        let id = &self.config.experiment_id;
        let cycle = self.config.cycle;
        let prefix = CampaignPaths::prefix(id, cycle);
        let name = |artifact: Artifact| format!("{prefix}{}", artifact.suffix());
        let indices = &selection.acquisition.indices;
        let column = &self.config.identifier_column;

        let mut writer = ArtifactWriter::create(self.paths.cycle_dir(cycle))?;

        let rows = selection.pool.rows_batch(indices)?;
        let feature_positions: Vec<usize> = (0..selection.pool.feature_names().len()).collect();
        let points = artifacts::with_text_column(&rows.project(&feature_positions)?, column, barcodes)?;
        writer.table(&name(Artifact::OutputPoints), &points)?;
        writer.indices(&name(Artifact::Indices), indices)?;
        writer.column(&name(Artifact::Barcodes), column, barcodes)?;

        if let Some(probabilities) = &selection.acquisition.probabilities {
            writer.matrix(&name(Artifact::Probabilities), probabilities)?;
        }
        if let Some(model) = &selection.model {
            writer.json(&name(Artifact::Model), model)?;
        }
        if cycle > 0 {
            writer.table(&name(Artifact::SearchSpace), &selection.pool.to_batch()?)?;
        }

        record.advance(CycleState::Persisted)?;
        writer.json(&name(Artifact::Config), record)?;

        let written = writer.commit()?;
        info!(
            cycle,
            dir = %self.paths.cycle_dir(cycle).display(),
            files = written.len(),
            "cycle persisted"
        );
        Ok(written)
    }
}
