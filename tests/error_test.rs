//! Tests for error types

use std::path::PathBuf;

use doe_navigator::Error;

#[test]
fn test_configuration_error() {
    let error = Error::Configuration("Cycle 2 requires the validated points of cycle 1".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Configuration error"));
    assert!(error_str.contains("cycle 1"));
}

#[test]
fn test_unknown_point_error() {
    let error = Error::UnknownPoint {
        row: 3,
        features: "salt=0.5, ph=7".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Unknown point"));
    assert!(error_str.contains("row 3"));
    assert!(error_str.contains("salt=0.5, ph=7"));
}

#[test]
fn test_invalid_label_error() {
    let error = Error::InvalidLabel {
        row: 0,
        label: "-1".to_string(),
        expected: vec![0, 1],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid label -1"));
    assert!(error_str.contains("[0, 1]"));
}

#[test]
fn test_identifier_collision_error() {
    let error = Error::IdentifierCollision("7710A3K9ZQ01".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Identifier collision"));
    assert!(error_str.contains("7710A3K9ZQ01"));
    assert!(error_str.contains("generator defect"));
}

#[test]
fn test_missing_artifact_error() {
    let error = Error::MissingArtifact {
        dir: PathBuf::from("exp/cycles/cycle_2"),
        pattern: "*lab_results*.csv".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Missing artifact"));
    assert!(error_str.contains("*lab_results*.csv"));
    assert!(error_str.contains("cycle_2"));
}

#[test]
fn test_kernel_spec_error() {
    let error = Error::KernelSpec("Unknown kernel type 'Matern'".to_string());
    assert!(format!("{error}").contains("Kernel spec error"));
}

#[test]
fn test_classifier_error() {
    let error = Error::Classifier("not fitted".to_string());
    assert!(format!("{error}").contains("Classifier error: not fitted"));
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("file not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_invalid_input_error() {
    let error = Error::InvalidInput("Batch size must be positive".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid input"));
    assert!(error_str.contains("Batch size must be positive"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "pool.csv");
    let error: Error = io.into();
    assert!(matches!(error, Error::Io(_)));
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_json_error_conversion() {
    let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = parse.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom".to_string());
    assert_eq!(format!("{error}"), "custom");
}
