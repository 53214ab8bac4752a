use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use cardfraud_models::data::{read_dataset_csv, DatasetReaderConfig};
use cardfraud_models::pipeline::save_pipeline;
use cardfraud_models::report::{plot_precision_recall_curve, write_report};
use cardfraud_models::sink::{JsonFileSink, MetricsSink};
use cardfraud_models::trainer::train_cohort;

use crate::commands::input::RunConfig;

/// Where a trained candidate was written.
#[derive(Debug, Clone)]
pub struct TrainedArtifact {
    pub name: String,
    pub model_path: PathBuf,
    pub report_path: PathBuf,
}

/// Train every configured candidate and write one artifact directory per
/// successful candidate below `output_dir`.
pub fn run_training(config: &RunConfig, output_dir: &Path) -> Result<Vec<TrainedArtifact>> {
    let pipeline = &config.pipeline;
    let reader = DatasetReaderConfig::from_pipeline(pipeline);

    let train_path = config.train_data()?;
    let train_set = read_dataset_csv(train_path, &reader)
        .with_context(|| format!("Failed to read training data: {}", train_path.display()))?;
    train_set.log_summary("train");
    let valid_set = match &config.validation_data {
        Some(path) => {
            let valid = read_dataset_csv(path, &reader)
                .with_context(|| format!("Failed to read validation data: {}", path.display()))?;
            valid.log_summary("validation");
            Some(valid)
        }
        None => None,
    };

    let cohort = train_cohort(
        &pipeline.candidates,
        &train_set,
        valid_set.as_ref(),
        pipeline.max_parallel,
        pipeline.precision_k,
    )?;

    let sink = JsonFileSink::new(
        pipeline
            .metrics_path
            .clone()
            .unwrap_or_else(|| output_dir.join("metrics.jsonl")),
    );
    let mut artifacts = Vec::new();
    for result in &cohort {
        let candidate = match &result.outcome {
            Ok(candidate) => candidate,
            Err(e) => {
                log::error!("Candidate {} failed: {}", result.name, e);
                continue;
            }
        };

        let candidate_dir = output_dir.join(&candidate.name);
        let model_path = candidate_dir.join("model.json");
        save_pipeline(&candidate.pipeline, &model_path)?;

        sink.log_metrics(&format!("train.{}", candidate.name), &candidate.train_metrics.scalars())?;
        let curve_metrics = match &candidate.valid_metrics {
            Some(valid) => {
                sink.log_metrics(&format!("validation.{}", candidate.name), &valid.scalars())?;
                valid
            }
            None => &candidate.train_metrics,
        };

        let report_path = candidate_dir.join("precision_recall.html");
        let plot =
            plot_precision_recall_curve(&curve_metrics.precision_recall_curve, &candidate.name);
        write_report(&report_path, &plot)?;

        log::info!("Saved {} to {}", candidate.name, model_path.display());
        artifacts.push(TrainedArtifact {
            name: candidate.name.clone(),
            model_path,
            report_path,
        });
    }

    if artifacts.is_empty() {
        anyhow::bail!("Every candidate failed to train");
    }
    Ok(artifacts)
}
