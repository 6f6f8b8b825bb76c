//! Pool construction, loading and label merging

use std::fs;

use doe_navigator::design::{build_pool, DesignSpec};
use doe_navigator::search_space::{Label, LabelSchema, SearchSpace, ValidatedBatch};
use doe_navigator::Error;
use ndarray::array;

fn design_file(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("design.yaml");
    fs::write(
        &path,
        "experimentID: robot001
variables:
  - name: salt
    values: {start: 0.0, end: 0.3, step: 0.1}
  - name: ph
    values: [6.5, 7.5]
",
    )
    .unwrap();
    path
}

#[test]
fn test_design_pool_saved_and_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let spec = DesignSpec::from_path(design_file(dir.path())).unwrap();
    assert_eq!(spec.pool_file_name(), "DOE_robot001_2Dim.csv");

    let pool = build_pool(&spec, None).unwrap();
    assert_eq!(pool.len(), 6);
    assert_eq!(pool.unknown_indices().len(), 6);
    // ph (second variable) is the slow axis
    assert_eq!(pool.values().row(0).to_vec(), vec![0.0, 6.5]);
    assert_eq!(pool.values().row(1).to_vec(), vec![0.1, 6.5]);
    assert_eq!(pool.values().row(3).to_vec(), vec![0.0, 7.5]);

    let path = dir.path().join(spec.pool_file_name());
    pool.save(&path).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("salt,ph,Phase\n"));

    let reloaded = SearchSpace::load(&path, LabelSchema::default()).unwrap();
    assert_eq!(reloaded, pool);
}

#[test]
fn test_merge_is_idempotent_with_overwrite() {
    let mut pool = SearchSpace::from_parts(
        vec!["salt".to_string(), "ph".to_string()],
        array![[0.0, 6.5], [0.1, 6.5], [0.2, 6.5]],
        vec![Label::Unknown; 3],
        LabelSchema::default(),
    )
    .unwrap();
    // columns in a different order than the pool
    let validated = ValidatedBatch::new(
        vec!["ph".to_string(), "salt".to_string()],
        array![[6.5, 0.2], [6.5, 0.0]],
        vec![1, 0],
    )
    .unwrap();

    let first = pool.merge_validated(&validated, true).unwrap();
    assert_eq!(first.labeled, vec![2, 0]);
    let labels = pool.labels().to_vec();

    let second = pool.merge_validated(&validated, true).unwrap();
    assert!(second.labeled.is_empty());
    assert!(second.corrected.is_empty());
    assert_eq!(second.confirmed.len(), 2);
    assert_eq!(pool.labels(), labels.as_slice());
    assert_eq!(pool.labels()[2], Label::Class(1));
}

#[test]
fn test_validated_point_outside_pool() {
    let dir = tempfile::tempdir().unwrap();
    let pool_path = dir.path().join("pool.csv");
    fs::write(&pool_path, "salt,ph,Phase\n0.0,6.5,-1\n0.1,6.5,-1\n").unwrap();
    let validated_path = dir.path().join("validated.csv");
    fs::write(&validated_path, "Barcode,salt,ph,Phase\nAB12,0.1,6.5,1\nCD34,0.15,6.5,0\n").unwrap();

    let mut pool = SearchSpace::load(&pool_path, LabelSchema::default()).unwrap();
    let validated = ValidatedBatch::read(&validated_path, "Phase", &["Barcode"]).unwrap();
    assert_eq!(validated.feature_names(), &["salt".to_string(), "ph".to_string()]);

    let err = pool.merge_validated(&validated, true).unwrap_err();
    match err {
        Error::UnknownPoint { row, features } => {
            assert_eq!(row, 1);
            assert!(features.contains("salt=0.15"));
        }
        other => panic!("unexpected error {other}"),
    }
    // nothing was applied
    assert_eq!(pool.known_indices().len(), 0);
}

#[test]
fn test_custom_label_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.csv");
    fs::write(&path, "a,Outcome\n1,99\n2,3\n3,4\n").unwrap();
    let schema = LabelSchema {
        target: "Outcome".to_string(),
        unknown: 99,
        classes: vec![3, 4],
    };
    let pool = SearchSpace::load(&path, schema).unwrap();
    assert_eq!(pool.known_indices(), vec![1, 2]);
    assert_eq!(pool.labels()[0], Label::Unknown);
    assert_eq!(pool.feature_names(), &["a".to_string()]);
}
