use std::path::Path;

use anyhow::{Context, Result};

use cardfraud_models::data::{read_dataset_csv, Dataset, DatasetReaderConfig};
use cardfraud_models::promotion::{run_promotion_cycle, CycleOutcome, PromotionPolicy};
use cardfraud_models::registry::LocalRegistry;
use cardfraud_models::report::{plot_precision_recall_curve, write_report};
use cardfraud_models::sink::JsonFileSink;
use cardfraud_models::trainer::train_cohort;

use crate::commands::input::RunConfig;

const SPLIT_SEED: u64 = 42;
const VALID_SIZE: f64 = 0.15;
const TEST_SIZE: f64 = 0.15;

fn read_split(path: &Path, reader: &DatasetReaderConfig, name: &str) -> Result<Dataset> {
    let dataset = read_dataset_csv(path, reader)
        .with_context(|| format!("Failed to read {} data: {}", name, path.display()))?;
    dataset.log_summary(name);
    Ok(dataset)
}

/// Train the cohort and run one champion/challenger cycle against the
/// local registry.
///
/// Without validation and test files the training file is split
/// 70/15/15 with a fixed seed.
pub fn run_promotion(config: &RunConfig) -> Result<CycleOutcome> {
    let pipeline = &config.pipeline;
    let reader = DatasetReaderConfig::from_pipeline(pipeline);
    let full = read_split(config.train_data()?, &reader, "train")?;

    let (train_set, valid_set, test_set) = match (&config.validation_data, &config.test_data) {
        (None, None) => {
            log::info!("No validation/test files given, splitting the training data");
            let (train, valid, test) = full.split(VALID_SIZE, TEST_SIZE, SPLIT_SEED)?;
            (train, Some(valid), test)
        }
        (valid, Some(test)) => {
            let valid = match valid {
                Some(path) => Some(read_split(path, &reader, "validation")?),
                None => None,
            };
            (full, valid, read_split(test, &reader, "test")?)
        }
        (Some(_), None) => anyhow::bail!("A test file is required when validation data is given"),
    };

    let cohort = train_cohort(
        &pipeline.candidates,
        &train_set,
        valid_set.as_ref(),
        pipeline.max_parallel,
        pipeline.precision_k,
    )?;

    let registry = LocalRegistry::new(pipeline.registry_root.clone());
    let sink = JsonFileSink::new(
        pipeline
            .metrics_path
            .clone()
            .unwrap_or_else(|| pipeline.artifact_dir.join("metrics.jsonl")),
    );
    let policy = PromotionPolicy::from_config(pipeline);
    let outcome = run_promotion_cycle(&registry, &sink, &cohort, &test_set, &policy)
        .context("Promotion cycle failed")?;

    let best = &outcome.selection;
    let plot = plot_precision_recall_curve(
        &best.best_metrics().precision_recall_curve,
        &best.best_name,
    );
    write_report(
        pipeline
            .artifact_dir
            .join("reports")
            .join(format!("{}_precision_recall.html", best.best_name)),
        &plot,
    )?;

    log::info!(
        "Cycle finished: {} version {} is {}",
        best.best_name,
        outcome.challenger.version,
        outcome.stage
    );
    Ok(outcome)
}
