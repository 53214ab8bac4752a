use std::path::Path;

use anyhow::{Context, Result};

use cardfraud_models::data::{read_dataset_csv, DatasetReaderConfig};
use cardfraud_models::metrics::{evaluate, Metrics};
use cardfraud_models::pipeline::load_pipeline;
use cardfraud_models::report::{plot_score_histogram, write_report};

/// Score a saved pipeline on a labelled CSV file, optionally writing a
/// histogram of the predicted probabilities to `report`.
pub fn run_evaluation(
    model_path: &Path,
    data_path: &Path,
    reader: &DatasetReaderConfig,
    precision_k: usize,
    report: Option<&Path>,
) -> Result<Metrics> {
    let pipeline = load_pipeline(model_path)
        .with_context(|| format!("Failed to load model: {}", model_path.display()))?;
    let mut dataset = read_dataset_csv(data_path, reader)
        .with_context(|| format!("Failed to read data: {}", data_path.display()))?;

    let expected = &pipeline.metadata.feature_names;
    if !expected.is_empty() && *expected != dataset.feature_names {
        log::debug!("Reordering columns of {} to the training order", data_path.display());
        dataset = dataset.with_feature_order(expected)?;
    }

    let evaluation = evaluate(&pipeline, &dataset.x, &dataset.y, precision_k)?;
    evaluation.metrics.log(pipeline.name());

    if let Some(report) = report {
        let title = format!("{}: fraud probability by class", pipeline.name());
        let plot = plot_score_histogram(&evaluation.probabilities, &dataset.y, &title)?;
        write_report(report, &plot)?;
    }
    Ok(evaluation.metrics)
}
