//! CLI binary smoke tests using assert_cmd.
//!
//! These run the compiled `cardfraud` binary on small generated CSV files.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

use cardfraud_cli::commands::input::RunConfig;
use cardfraud_models::config::{CandidateSpec, ModelConfig, ModelType, PipelineConfig};

fn cmd() -> Command {
    Command::cargo_bin("cardfraud").unwrap()
}

/// Every fourth transaction is a fraud with a large amount.
fn write_transactions(path: &Path, n: usize, offset: usize) {
    let mut content = String::from("transaction_id,amount,hour,is_fraud\n");
    for i in offset..offset + n {
        let fraud = i % 4 == 0;
        let amount = if fraud { 900.0 + i as f64 } else { (i % 50) as f64 };
        writeln!(content, "t{},{},{},{}", i, amount, i % 24, u8::from(fraud)).unwrap();
    }
    fs::write(path, content).unwrap();
}

struct Workspace {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    write_transactions(&root.join("train.csv"), 120, 0);
    write_transactions(&root.join("valid.csv"), 40, 120);
    write_transactions(&root.join("test.csv"), 40, 160);

    let pipeline = PipelineConfig {
        candidates: vec![CandidateSpec::new(
            "logistic_regression",
            ModelConfig::new(0.5, ModelType::LogisticRegression {
                c: 1.0,
                max_iter: 300,
                tol: 1e-6,
            }),
        )],
        precision_k: 5,
        registry_root: root.join("registry"),
        artifact_dir: root.join("artifacts"),
        ..PipelineConfig::default()
    };
    let config = root.join("config.json");
    let run = RunConfig {
        pipeline,
        ..RunConfig::default()
    };
    fs::write(&config, serde_json::to_string_pretty(&run).unwrap()).unwrap();

    Workspace {
        _dir: dir,
        root,
        config,
    }
}

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

#[test]
fn no_args_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("train"))
        .stdout(predicate::str::contains("promote"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cardfraud"));
}

// ---------------------------------------------------------------------------
// train / evaluate / promote
// ---------------------------------------------------------------------------

#[test]
fn train_nonexistent_config_errors() {
    cmd()
        .args(["train", "/nonexistent/config.json"])
        .assert()
        .failure();
}

#[test]
fn train_rejects_non_csv_data() {
    let ws = workspace();
    let bad = ws.root.join("train.tsv");
    fs::write(&bad, "x").unwrap();
    cmd()
        .arg("train")
        .arg(&ws.config)
        .arg("-d")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains(".csv"));
}

#[test]
fn train_writes_artifacts_and_reports() {
    let ws = workspace();
    let out = ws.root.join("out");
    cmd()
        .arg("train")
        .arg(&ws.config)
        .arg("-d")
        .arg(ws.root.join("train.csv"))
        .arg("-v")
        .arg(ws.root.join("valid.csv"))
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("logistic_regression"));

    assert!(out.join("logistic_regression").join("model.json").is_file());
    assert!(out.join("logistic_regression").join("precision_recall.html").is_file());
    let metrics = fs::read_to_string(out.join("metrics.jsonl")).unwrap();
    assert!(metrics.contains("train.logistic_regression"));
    assert!(metrics.contains("validation.logistic_regression"));
}

#[test]
fn promote_then_evaluate_champion() {
    let ws = workspace();
    cmd()
        .arg("promote")
        .arg(&ws.config)
        .arg("-d")
        .arg(ws.root.join("train.csv"))
        .arg("-v")
        .arg(ws.root.join("valid.csv"))
        .arg("-t")
        .arg(ws.root.join("test.csv"))
        .assert()
        .success()
        .stdout(predicate::str::contains("champion"));

    let model_dir = ws.root.join("registry").join("credit-card-frauds");
    assert!(model_dir.join("registry.json").is_file());
    let artifact = model_dir.join("versions").join("1").join("model.json");
    assert!(artifact.is_file());

    cmd()
        .arg("evaluate")
        .arg(&artifact)
        .arg(ws.root.join("test.csv"))
        .arg("--config")
        .arg(&ws.config)
        .arg("--report")
        .arg(ws.root.join("scores.html"))
        .assert()
        .success()
        .stdout(predicate::str::contains("roc_auc"))
        .stdout(predicate::str::contains("precision_top_k"));
    assert!(ws.root.join("scores.html").is_file());
}

#[test]
fn promote_requires_test_data_with_validation_data() {
    let ws = workspace();
    cmd()
        .arg("promote")
        .arg(&ws.config)
        .arg("-d")
        .arg(ws.root.join("train.csv"))
        .arg("-v")
        .arg(ws.root.join("valid.csv"))
        .assert()
        .failure();
}

#[test]
fn predict_scores_unlabelled_rows() {
    let ws = workspace();
    let out = ws.root.join("out");
    cmd()
        .arg("train")
        .arg(&ws.config)
        .arg("-d")
        .arg(ws.root.join("train.csv"))
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    // no target column, features in a different order than in training
    let input = ws.root.join("incoming.csv");
    fs::write(&input, "transaction_id,hour,amount\nn1,5,3.0\nn2,8,2500.0\n").unwrap();
    let predictions = ws.root.join("predictions.csv");
    cmd()
        .arg("predict")
        .arg(out.join("logistic_regression").join("model.json"))
        .arg(&input)
        .arg("-o")
        .arg(&predictions)
        .assert()
        .success()
        .stdout(predicate::str::contains("2\t"));

    let written = fs::read_to_string(&predictions).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next(),
        Some("transaction_id,hour,amount,pred,fraud_probability")
    );
    let first: Vec<&str> = lines.next().unwrap().split(',').collect();
    let second: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert_eq!(&first[..3], &["n1", "5", "3.0"]);
    assert_eq!(first[3], "0");
    assert_eq!(second[3], "1");
}

#[test]
fn predict_requires_output_path() {
    let ws = workspace();
    cmd()
        .arg("predict")
        .arg(ws.root.join("model.json"))
        .arg(ws.root.join("test.csv"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output"));
}
