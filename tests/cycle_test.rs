//! End-to-end campaign: pool -> cycle 0 -> ledger -> lab -> cycle 1 -> cycle 2

use std::fs;
use std::path::{Path, PathBuf};

use doe_navigator::campaign::Campaign;
use doe_navigator::config::{Artifact, CampaignPaths, CycleConfig, PhaseMapping};
use doe_navigator::convergence::{consecutive_shifts, load_cycle_entropies, DEFAULT_BAND};
use doe_navigator::cycle::{CycleController, CycleState};
use doe_navigator::identifier::{BarcodeGenerator, TimestampBarcode};
use doe_navigator::ledger::LedgerStore;
use doe_navigator::storage::{self, ColumnTypes};
use doe_navigator::{Error, Label, LabelSchema, SearchSpace};
use ndarray::Array2;
use ndarray_npy::read_npy;
use tempfile::TempDir;

const EXPERIMENT: &str = "e2e";

fn setup() -> (TempDir, CampaignPaths) {
    let dir = tempfile::tempdir().unwrap();
    let paths = CampaignPaths::new(dir.path().join("exp"), dir.path().join("master"));
    fs::create_dir_all(paths.dataset_dir()).unwrap();

    let mut csv = String::from("x,y,Phase\n");
    for y in 0..8 {
        for x in 0..8 {
            csv.push_str(&format!("{x}.0,{y}.0,-1\n"));
        }
    }
    fs::write(paths.dataset_dir().join("pool.csv"), csv).unwrap();
    (dir, paths)
}

fn write_config(dir: &Path, cycle: u32, search_space: &str, validated: Option<&str>) -> PathBuf {
    let mut yaml = format!(
        "experimentID: {EXPERIMENT}\ncycle_number: {cycle}\nsearch_space_dataset: {search_space}\nnew_points_batch: 8\nsampling_mode: FPS\nseed: 3\n"
    );
    if let Some(validated) = validated {
        yaml.push_str(&format!("validated_dataset: {validated}\n"));
    }
    let path = dir.join(format!("cycle_{cycle}.yaml"));
    fs::write(&path, yaml).unwrap();
    path
}

fn run_cycle(paths: &CampaignPaths, config: &Path, seed: u64) -> doe_navigator::cycle::CycleOutcome {
    let config = CycleConfig::from_path(config).unwrap();
    let mut generator = TimestampBarcode::with_seed(seed, 1_700_000_000);
    CycleController::new(config, paths.clone())
        .unwrap()
        .run_with(&mut generator)
        .unwrap()
}

fn mapping() -> PhaseMapping {
    PhaseMapping::new([("LLPS", 1), ("clear", 0)])
}

/// Register a cycle in the ledger, answer it like the lab would (phase
/// separation for `x >= 4`) and extract the validated points.
fn close_cycle(paths: &CampaignPaths, cycle: u32) -> PathBuf {
    let campaign = Campaign::new(paths.clone(), EXPERIMENT, "Barcode");
    campaign.append_cycle(cycle, None).unwrap();

    let points = storage::read_csv(
        paths.artifact(EXPERIMENT, cycle, Artifact::OutputPoints),
        ColumnTypes::Infer,
    )
    .unwrap();
    let xs = storage::float_column(&points, "x").unwrap();
    let barcodes = storage::text_column(&points, "Barcode").unwrap();
    let mut lab = String::from("Barcode,Phase\n");
    for (x, barcode) in xs.iter().zip(barcodes) {
        let phase = if *x >= 4.0 { "LLPS" } else { "clear" };
        lab.push_str(&format!("{},{phase}\n", barcode.unwrap()));
    }
    fs::write(
        paths.cycle_dir(cycle).join(format!("{EXPERIMENT}_cycle{cycle}_lab_results.csv")),
        lab,
    )
    .unwrap();

    let (_, report) = campaign.update_from_lab(cycle).unwrap();
    assert_eq!(report.updated.len(), 8);
    assert!(report.unmatched.is_empty());

    let names = vec!["x".to_string(), "y".to_string()];
    campaign
        .extract_cycle_validated(cycle, &names, "Phase", &mapping())
        .unwrap()
}

#[test]
fn test_full_campaign() {
    let (dir, paths) = setup();

    // cycle 0: model-free
    let outcome = run_cycle(&paths, &write_config(dir.path(), 0, "pool.csv", None), 1);
    assert_eq!(outcome.record.state(), CycleState::Persisted);
    assert_eq!(outcome.barcodes.len(), 8);
    assert!(outcome.selection.model.is_none());
    assert!(paths.artifact(EXPERIMENT, 0, Artifact::OutputPoints).exists());
    assert!(paths.artifact(EXPERIMENT, 0, Artifact::Indices).exists());
    assert!(paths.artifact(EXPERIMENT, 0, Artifact::Barcodes).exists());
    assert!(paths.artifact(EXPERIMENT, 0, Artifact::Config).exists());
    assert!(!paths.artifact(EXPERIMENT, 0, Artifact::Probabilities).exists());

    let ndx = fs::read_to_string(paths.artifact(EXPERIMENT, 0, Artifact::Indices)).unwrap();
    let indices: Vec<usize> = ndx.lines().map(|l| l.trim().parse().unwrap()).collect();
    assert_eq!(indices, outcome.selection.acquisition.indices);

    let validated = close_cycle(&paths, 0);
    assert!(validated.ends_with("e2e_cycle0_validated_points.csv"));

    let store = LedgerStore::new(paths.master_dir());
    assert_eq!(store.versions().unwrap(), vec![0, 1]);
    let (_, ledger) = store.load_latest().unwrap();
    assert_eq!(ledger.len(), 8);
    assert!(ledger.columns().iter().any(|c| c == "Experiment_ID"));
    assert!(ledger.column("Phase").unwrap().iter().all(Option::is_some));

    // cycle 1: Gaussian process on the merged labels
    let cycle_1 = write_config(dir.path(), 1, "pool.csv", Some("e2e_cycle0_validated_points.csv"));
    let outcome = run_cycle(&paths, &cycle_1, 2);
    assert_eq!(outcome.selection.merge.as_ref().unwrap().labeled.len(), 8);
    assert_eq!(outcome.record.known_at_entry().len(), 8);

    let probabilities: Array2<f64> =
        read_npy(paths.artifact(EXPERIMENT, 1, Artifact::Probabilities)).unwrap();
    assert_eq!(probabilities.dim(), (64, 2));
    assert!(paths.artifact(EXPERIMENT, 1, Artifact::Model).exists());

    let merged = SearchSpace::load(
        paths.artifact(EXPERIMENT, 1, Artifact::SearchSpace),
        LabelSchema::default(),
    )
    .unwrap();
    assert_eq!(merged.known_indices().len(), 8);
    for &i in &outcome.selection.acquisition.indices {
        assert_eq!(merged.labels()[i], Label::Unknown);
    }

    // cycle 2 continues from cycle 1's pool
    close_cycle(&paths, 1);
    assert_eq!(store.versions().unwrap(), vec![0, 1, 2]);
    let pool_1 = paths.artifact(EXPERIMENT, 1, Artifact::SearchSpace);
    let cycle_2 = write_config(
        dir.path(),
        2,
        pool_1.to_str().unwrap(),
        Some("e2e_cycle1_validated_points.csv"),
    );
    let outcome = run_cycle(&paths, &cycle_2, 3);
    assert_eq!(outcome.record.known_at_entry().len(), 16);

    let entropies = load_cycle_entropies(&paths, EXPERIMENT, &[1, 2], Some(2)).unwrap();
    let shifts = consecutive_shifts(&entropies, DEFAULT_BAND).unwrap();
    assert_eq!(shifts.len(), 1);
    assert!(shifts[0].decreased + shifts[0].increased <= 1.0);
}

#[test]
fn test_cycle_two_without_validated_points_is_rejected() {
    let (dir, paths) = setup();
    let config = CycleConfig::from_path(write_config(dir.path(), 2, "pool.csv", None)).unwrap();
    let err = CycleController::new(config, paths.clone()).unwrap().run().unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(!paths.cycle_dir(2).exists());
}

#[test]
fn test_cycle_zero_with_validated_points_is_rejected() {
    let (dir, paths) = setup();
    let config =
        CycleConfig::from_path(write_config(dir.path(), 0, "pool.csv", Some("validated.csv"))).unwrap();
    let err = CycleController::new(config, paths).unwrap().run().unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn test_missing_validated_file_is_missing_artifact() {
    let (dir, paths) = setup();
    let config =
        CycleConfig::from_path(write_config(dir.path(), 1, "pool.csv", Some("nowhere.csv"))).unwrap();
    let err = CycleController::new(config, paths).unwrap().run().unwrap_err();
    assert!(matches!(err, Error::MissingArtifact { .. }));
}

struct Repeating;

impl BarcodeGenerator for Repeating {
    fn generate(&mut self) -> String {
        "AAAAAAAAAAAA".to_string()
    }
}

#[test]
fn test_barcode_collision_leaves_nothing_behind() {
    let (dir, paths) = setup();
    let config = CycleConfig::from_path(write_config(dir.path(), 0, "pool.csv", None)).unwrap();
    let err = CycleController::new(config, paths.clone())
        .unwrap()
        .run_with(&mut Repeating)
        .unwrap_err();
    assert!(matches!(err, Error::IdentifierCollision(ref b) if b == "AAAAAAAAAAAA"));
    assert!(!paths.artifact(EXPERIMENT, 0, Artifact::OutputPoints).exists());
    assert!(!paths.artifact(EXPERIMENT, 0, Artifact::Config).exists());
}

fn snapshot(paths: &CampaignPaths, cycle: u32, artifacts: &[Artifact]) -> Vec<Vec<u8>> {
    artifacts
        .iter()
        .map(|&artifact| fs::read(paths.artifact(EXPERIMENT, cycle, artifact)).unwrap())
        .collect()
}

fn cycles_dir_entries(paths: &CampaignPaths) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(paths.experiment_dir().join("cycles"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_rerun_replaces_artifacts() {
    let (dir, paths) = setup();
    let config = write_config(dir.path(), 0, "pool.csv", None);
    let first = run_cycle(&paths, &config, 1);
    let second = run_cycle(&paths, &config, 2);
    assert_ne!(first.barcodes, second.barcodes);

    let barcodes = storage::read_csv(
        paths.artifact(EXPERIMENT, 0, Artifact::Barcodes),
        ColumnTypes::Text,
    )
    .unwrap();
    let written: Vec<String> = storage::text_column(&barcodes, "Barcode")
        .unwrap()
        .into_iter()
        .map(Option::unwrap)
        .collect();
    assert_eq!(written, second.barcodes);
    assert_eq!(cycles_dir_entries(&paths), vec!["cycle_0".to_string()]);
}

#[test]
fn test_failed_rerun_keeps_earlier_artifacts() {
    let (dir, paths) = setup();
    run_cycle(&paths, &write_config(dir.path(), 0, "pool.csv", None), 1);
    close_cycle(&paths, 0);
    let config = write_config(dir.path(), 1, "pool.csv", Some("e2e_cycle0_validated_points.csv"));
    run_cycle(&paths, &config, 2);

    let kept = [
        Artifact::OutputPoints,
        Artifact::Indices,
        Artifact::Barcodes,
        Artifact::Probabilities,
        Artifact::Model,
        Artifact::Config,
    ];
    let before = snapshot(&paths, 1, &kept);

    // a directory where the search-space snapshot goes makes the rerun fail
    let blocked = paths.artifact(EXPERIMENT, 1, Artifact::SearchSpace);
    fs::remove_file(&blocked).unwrap();
    fs::create_dir(&blocked).unwrap();

    let config = CycleConfig::from_path(&config).unwrap();
    let err = CycleController::new(config, paths.clone())
        .unwrap()
        .run_with(&mut TimestampBarcode::with_seed(99, 1_700_000_000))
        .unwrap_err();
    assert!(matches!(err, Error::StorageError(_)));

    assert_eq!(snapshot(&paths, 1, &kept), before);
    assert!(blocked.is_dir());
    assert_eq!(
        cycles_dir_entries(&paths),
        vec!["cycle_0".to_string(), "cycle_1".to_string()]
    );
}
