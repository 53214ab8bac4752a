//! Integration tests for run configuration parsing and input validation.

use std::fs;

use cardfraud_cli::commands::input::{load_run_config, validate_csv_file};
use cardfraud_cli::serve::{instances_to_matrix, Instance};

// ---------------------------------------------------------------------------
// validate_csv_file
// ---------------------------------------------------------------------------

#[test]
fn validate_csv_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.csv");
    fs::File::create(&path).unwrap();
    assert!(validate_csv_file(&path).is_ok());
}

#[test]
fn validate_wrong_extension_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.parquet");
    fs::File::create(&path).unwrap();
    assert!(validate_csv_file(&path).is_err());
}

#[test]
fn validate_nonexistent_file_errors() {
    assert!(validate_csv_file(std::path::Path::new("/nonexistent/data.csv")).is_err());
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

#[test]
fn partial_config_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "model_id": "cc-frauds",
            "train_data": "train.csv",
            "candidates": [
                {
                    "name": "sgd",
                    "model": {
                        "learning_rate": 0.01,
                        "SgdClassifier": {
                            "alpha": 0.0001,
                            "eta0": 0.01,
                            "max_epochs": 20,
                            "n_iter_no_change": 3,
                            "random_state": 42
                        }
                    },
                    "data_processing": { "data_sampling": "rose" }
                }
            ]
        }"#,
    )
    .unwrap();

    let config = load_run_config(&path).unwrap();
    assert_eq!(config.pipeline.model_id, "cc-frauds");
    assert_eq!(config.pipeline.metric_to_optimise, "average_precision");
    assert_eq!(config.pipeline.target_column, "is_fraud");
    assert_eq!(config.train_data.as_deref(), Some(std::path::Path::new("train.csv")));
    assert!(config.test_data.is_none());

    let candidate = &config.pipeline.candidates[0];
    assert!(!candidate.use_eval_set());
    assert_eq!(candidate.data_processing.data_sampling, "rose");
    assert_eq!(candidate.data_processing.data_standardization, "standard");
    assert!(config.pipeline.validate().is_ok());
}

#[test]
fn malformed_config_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();
    let err = load_run_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config"));
}

// ---------------------------------------------------------------------------
// serve request decoding
// ---------------------------------------------------------------------------

#[test]
fn named_instances_follow_training_order() {
    let names = vec!["amount".to_string(), "hour".to_string()];
    let instances: Vec<Instance> =
        serde_json::from_str(r#"[{"hour": 3.0, "amount": 10.0}, [20.0, 4.0]]"#).unwrap();
    let x = instances_to_matrix(&instances, &names).unwrap();
    assert_eq!(x.shape(), &[2, 2]);
    assert_eq!(x[[0, 0]], 10.0);
    assert_eq!(x[[0, 1]], 3.0);
    assert_eq!(x[[1, 0]], 20.0);
}

#[test]
fn named_instances_need_feature_names() {
    let instances: Vec<Instance> = serde_json::from_str(r#"[{"amount": 1.0}]"#).unwrap();
    assert!(instances_to_matrix(&instances, &[]).is_err());
    let rows: Vec<Instance> = serde_json::from_str("[[1.0, 2.0]]").unwrap();
    assert_eq!(instances_to_matrix(&rows, &[]).unwrap().ncols(), 2);
}
