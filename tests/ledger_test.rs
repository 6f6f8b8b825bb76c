//! Versioned ledger: append, update, extract

use std::fs;

use doe_navigator::config::PhaseMapping;
use doe_navigator::ledger::{Ledger, LedgerStore, WriteMode};
use doe_navigator::Error;

fn text(values: &[&str]) -> Vec<Option<String>> {
    values
        .iter()
        .map(|v| (!v.is_empty()).then(|| (*v).to_string()))
        .collect()
}

fn selection(barcodes: &[&str], xs: &[&str]) -> Ledger {
    Ledger::from_columns(vec![
        ("x".to_string(), text(xs)),
        ("Barcode".to_string(), text(barcodes)),
    ])
    .unwrap()
}

#[test]
fn test_append_then_update_versions() {
    let dir = tempfile::tempdir().unwrap();
    let store = LedgerStore::new(dir.path().join("master"));

    let first = selection(&["A", "B"], &["0.1", "0.2"]);
    let (v1, ()) = store
        .read_modify_write(WriteMode::NextVersion, |ledger| {
            ledger.append(&first, None);
            Ok(())
        })
        .unwrap();
    assert_eq!(v1, 1);
    assert_eq!(store.versions().unwrap(), vec![0, 1]);
    assert_eq!(fs::metadata(store.version_path(0)).unwrap().len(), 0);

    let results = Ledger::from_columns(vec![
        ("Barcode".to_string(), text(&["B", "Z"])),
        ("Phase".to_string(), text(&["LLPS", "clear"])),
    ])
    .unwrap();
    let (v, report) = store
        .read_modify_write(WriteMode::InPlace, |ledger| ledger.update(&results, "Barcode"))
        .unwrap();
    assert_eq!(v, 1);
    assert_eq!(report.updated, vec![1]);
    assert_eq!(report.unmatched, vec!["Z".to_string()]);
    assert_eq!(report.added_columns, vec!["Phase".to_string()]);

    let second = selection(&["C"], &["0.3"]);
    let (v2, ()) = store
        .read_modify_write(WriteMode::NextVersion, |ledger| {
            ledger.append(&second, None);
            Ok(())
        })
        .unwrap();
    assert_eq!(v2, 2);

    // version 1 is untouched by the append
    let old = store.read(1).unwrap();
    assert_eq!(old.len(), 2);
    let (_, latest) = store.load_latest().unwrap();
    assert_eq!(latest.len(), 3);
    assert_eq!(latest.cell(0, "x"), Some("0.1"));
    assert_eq!(latest.cell(1, "Phase"), Some("LLPS"));
    assert_eq!(latest.cell(0, "Phase"), None);
    assert_eq!(latest.cell(2, "Barcode"), Some("C"));
}

#[test]
fn test_update_leaves_other_columns_alone() {
    let mut ledger = Ledger::from_columns(vec![
        ("Barcode".to_string(), text(&["A", "B"])),
        ("x".to_string(), text(&["1", "2"])),
        ("Note".to_string(), text(&["keep", ""])),
    ])
    .unwrap();
    let results = Ledger::from_columns(vec![
        ("Barcode".to_string(), text(&["A"])),
        ("Note".to_string(), text(&[""])),
        ("Phase".to_string(), text(&["1"])),
    ])
    .unwrap();

    ledger.update(&results, "Barcode").unwrap();
    assert_eq!(ledger.cell(0, "Note"), Some("keep"));
    assert_eq!(ledger.cell(0, "x"), Some("1"));
    assert_eq!(ledger.cell(1, "x"), Some("2"));
    assert_eq!(ledger.cell(0, "Phase"), Some("1"));
    assert_eq!(ledger.cell(1, "Phase"), None);
}

#[test]
fn test_next_version_follows_highest() {
    let dir = tempfile::tempdir().unwrap();
    let store = LedgerStore::new(dir.path());
    store.load_latest().unwrap();
    // a stray higher version makes that the latest, so the next one is free
    fs::write(store.version_path(5), "Barcode\nA\n").unwrap();
    let (version, ()) = store
        .read_modify_write(WriteMode::NextVersion, |_| Ok(()))
        .unwrap();
    assert_eq!(version, 6);
    assert_eq!(store.versions().unwrap(), vec![0, 5, 6]);
}

#[test]
fn test_failed_mutation_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = LedgerStore::new(dir.path());
    let result: doe_navigator::Result<(u64, ())> =
        store.read_modify_write(WriteMode::NextVersion, |_| Err(Error::Other("abort".to_string())));
    assert!(result.is_err());
    assert_eq!(store.versions().unwrap(), vec![0]);
}

#[test]
fn test_fill_value_fills_every_gap() {
    let mut ledger = selection(&["A"], &[""]);
    ledger.append(&selection(&["B"], &["0.5"]), Some("NA"));
    assert_eq!(ledger.cell(0, "x"), Some("NA"));
    assert_eq!(ledger.cell(1, "x"), Some("0.5"));
}

#[test]
fn test_extract_maps_result_codes() {
    let ledger = Ledger::from_columns(vec![
        ("x".to_string(), text(&["0.1", "0.2", "0.3"])),
        ("Barcode".to_string(), text(&["A", "B", "C"])),
        ("Phase".to_string(), text(&["LLPS", "clear", "clear"])),
    ])
    .unwrap();
    let mapping = PhaseMapping::new([("LLPS", 1), ("clear", 0)]);
    let wanted = vec!["C".to_string(), "A".to_string()];

    let batch = ledger
        .extract_validated(&wanted, "Barcode", &["x".to_string()], "Phase", &mapping)
        .unwrap();
    assert_eq!(batch.feature_names(), &["x".to_string()]);
    // ledger order, not request order
    assert_eq!(batch.labels(), &[1, 0]);
    assert_eq!(batch.len(), 2);
}

#[test]
fn test_extract_rejects_unmapped_code() {
    let ledger = Ledger::from_columns(vec![
        ("x".to_string(), text(&["0.1"])),
        ("Barcode".to_string(), text(&["A"])),
        ("Phase".to_string(), text(&["cloudy"])),
    ])
    .unwrap();
    let mapping = PhaseMapping::new([("LLPS", 1), ("clear", 0)]);
    let err = ledger
        .extract_validated(&["A".to_string()], "Barcode", &["x".to_string()], "Phase", &mapping)
        .unwrap_err();
    match err {
        Error::InvalidLabel { label, expected, .. } => {
            assert_eq!(label, "cloudy");
            assert_eq!(expected, vec![0, 1]);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_duplicate_update_keys_are_rejected() {
    let mut ledger = selection(&["A"], &["1"]);
    let results = Ledger::from_columns(vec![
        ("Barcode".to_string(), text(&["A", "A"])),
        ("Phase".to_string(), text(&["1", "0"])),
    ])
    .unwrap();
    assert!(matches!(
        ledger.update(&results, "Barcode"),
        Err(Error::InvalidInput(_))
    ));
}
