//! Deployable artifact: an optional fitted scaler followed by a fitted
//! classifier, applied in that order to raw feature rows.
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::DataProcessingArgs;
use crate::error::{LifecycleError, Result};
use crate::models::{FittedModel, Predictor};
use crate::preprocessing::Scaler;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub model_name: String,
    /// Feature names in column order; may be empty when trained on bare arrays.
    pub feature_names: Vec<String>,
    pub data_processing: DataProcessingArgs,
    pub trained_at: DateTime<Utc>,
}

impl PipelineMetadata {
    pub fn new(
        model_name: &str,
        feature_names: Vec<String>,
        data_processing: DataProcessingArgs,
    ) -> Self {
        Self {
            model_name: model_name.to_string(),
            feature_names,
            data_processing,
            trained_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelPipeline {
    pub scaler: Option<Scaler>,
    pub model: FittedModel,
    pub metadata: PipelineMetadata,
}

impl ModelPipeline {
    pub fn new(scaler: Option<Scaler>, model: FittedModel, metadata: PipelineMetadata) -> Self {
        Self {
            scaler,
            model,
            metadata,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.model_name
    }

    /// Verify every stage reached a fitted state.
    pub fn check_is_fitted(&self) -> Result<()> {
        if let Some(scaler) = &self.scaler {
            scaler.check_is_fitted()?;
        }
        self.model.check_is_fitted()
    }
}

impl Predictor for ModelPipeline {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match &self.scaler {
            Some(scaler) => self.model.predict_proba(&scaler.transform(x)?),
            None => self.model.predict_proba(x),
        }
    }
}

/// Write a pipeline as one JSON artifact, creating parent directories.
pub fn save_pipeline<P: AsRef<Path>>(pipeline: &ModelPipeline, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer(&mut writer, pipeline)?;
    writer.flush()?;
    log::info!("Saved {} pipeline to {}", pipeline.name(), path.display());
    Ok(())
}

/// Load a pipeline artifact and verify it is usable.
pub fn load_pipeline<P: AsRef<Path>>(path: P) -> Result<ModelPipeline> {
    let path = path.as_ref();
    let reader = BufReader::new(fs::File::open(path).map_err(|e| {
        LifecycleError::Io(std::io::Error::new(
            e.kind(),
            format!("cannot open model artifact {}: {}", path.display(), e),
        ))
    })?);
    let pipeline: ModelPipeline = serde_json::from_reader(reader)?;
    pipeline.check_is_fitted()?;
    log::debug!("Loaded {} pipeline from {}", pipeline.name(), path.display());
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::linear::LinearModel;
    use crate::preprocessing::ScalerKind;
    use ndarray::array;

    #[test]
    fn pipeline_scales_before_predicting_and_survives_a_round_trip() {
        let x_train = array![[0.0], [10.0]];
        let scaler = ScalerKind::Standard.fit(&x_train).unwrap();
        let model = FittedModel::Linear(LinearModel {
            weights: vec![2.0],
            intercept: 0.0,
        });
        let pipeline = ModelPipeline::new(
            Some(scaler),
            model,
            PipelineMetadata::new("lr", vec!["amount".to_string()], DataProcessingArgs::default()),
        );

        // raw 5.0 scales to 0.0, so the probability is exactly one half
        let proba = pipeline.predict_proba(&array![[5.0], [15.0]]).unwrap();
        assert!((proba[0] - 0.5).abs() < 1e-12);
        assert!(proba[1] > 0.9);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        save_pipeline(&pipeline, &path).unwrap();
        let loaded = load_pipeline(&path).unwrap();
        assert_eq!(loaded.name(), "lr");
        assert_eq!(loaded.predict_proba(&array![[5.0], [15.0]]).unwrap(), proba);
    }

    #[test]
    fn unfitted_model_is_rejected_on_load() {
        let pipeline = ModelPipeline::new(
            None,
            FittedModel::Linear(LinearModel {
                weights: vec![],
                intercept: 0.0,
            }),
            PipelineMetadata::new("empty", vec![], DataProcessingArgs::default()),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        save_pipeline(&pipeline, &path).unwrap();
        assert!(matches!(
            load_pipeline(&path),
            Err(LifecycleError::NotFitted(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_is_reported() {
        let pipeline = ModelPipeline::new(
            None,
            FittedModel::Linear(LinearModel {
                weights: vec![1.0],
                intercept: 0.0,
            }),
            PipelineMetadata::new("lr", vec![], DataProcessingArgs::default()),
        );
        let result = save_pipeline(&pipeline, "/dev/full");
        assert!(matches!(result, Err(LifecycleError::Io(_))));
    }
}
