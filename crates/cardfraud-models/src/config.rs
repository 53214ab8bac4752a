use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};
use crate::metrics::Metrics;
use crate::preprocessing::{build_scaler, ScalerKind};
use crate::resampling::SamplingStrategy;

/// Central configuration for models in the crate.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelConfig {
    /// Step size of logistic regression, shrinkage of the boosters. SGD
    /// steps with its own `eta0`; random forests have no step size.
    pub learning_rate: f32,

    #[serde(flatten)]
    pub model_type: ModelType,
}

/// Supported model types and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ModelType {
    LogisticRegression {
        /// Inverse L2 regularisation strength.
        c: f64,
        max_iter: usize,
        tol: f64,
    },
    SgdClassifier {
        alpha: f64,
        eta0: f64,
        max_epochs: usize,
        n_iter_no_change: usize,
        random_state: u64,
    },
    RandomForest {
        n_estimators: usize,
        max_depth: Option<usize>,
        /// Fraction of features drawn for each tree, in (0, 1].
        max_features: f64,
        min_samples_split: usize,
        random_state: u64,
    },
    #[cfg(feature = "xgboost")]
    XGBoost {
        max_depth: u32,
        num_boost_round: u32,
        early_stopping_rounds: u32,
        verbose_eval: bool,
    },
    GBDT {
        max_depth: u32,
        num_boost_round: u32,
        debug: bool,
        training_optimization_level: u8,
        loss_type: String,
    },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::GBDT {
            max_depth: 6,
            num_boost_round: 50,
            debug: false,
            training_optimization_level: 2,
            loss_type: "LogLikelyhood".to_string(),
        }
    }
}

impl ModelType {
    /// Registry-friendly short name of the model family.
    pub fn name(&self) -> &'static str {
        match self {
            ModelType::LogisticRegression { .. } => "logistic_regression",
            ModelType::SgdClassifier { .. } => "sgd_classifier",
            ModelType::RandomForest { .. } => "random_forest",
            #[cfg(feature = "xgboost")]
            ModelType::XGBoost { .. } => "xgboost",
            ModelType::GBDT { .. } => "gbdt",
        }
    }
}

impl FromStr for ModelType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logistic_regression" => Ok(ModelType::LogisticRegression {
                c: 1.0,
                max_iter: 1000,
                tol: 1e-6,
            }),
            "sgd_classifier" => Ok(ModelType::SgdClassifier {
                alpha: 1e-4,
                eta0: 0.01,
                max_epochs: 50,
                n_iter_no_change: 5,
                random_state: 42,
            }),
            "random_forest" => Ok(ModelType::RandomForest {
                n_estimators: 100,
                max_depth: Some(8),
                max_features: 0.5,
                min_samples_split: 2,
                random_state: 42,
            }),
            "gbdt" => Ok(ModelType::default()),
            #[cfg(feature = "xgboost")]
            "xgboost" => Ok(ModelType::XGBoost {
                max_depth: 6,
                num_boost_round: 200,
                early_stopping_rounds: 10,
                verbose_eval: false,
            }),
            _ => Err(LifecycleError::Configuration(format!(
                "Unknown model type: {}. Expected one of logistic_regression, sgd_classifier, \
                 random_forest, gbdt (xgboost requires `--features xgboost`)",
                s
            ))),
        }
    }
}

impl ModelConfig {
    pub fn new(learning_rate: f32, model_type: ModelType) -> Self {
        Self {
            learning_rate,
            model_type,
        }
    }

    /// Whether the configured family reads `learning_rate`.
    pub fn uses_learning_rate(&self) -> bool {
        !matches!(
            self.model_type,
            ModelType::SgdClassifier { .. } | ModelType::RandomForest { .. }
        )
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            model_type: ModelType::default(),
        }
    }
}

/// Extra processing applied to the training split before fitting.
///
/// Field names and defaults match the data-processing arguments accepted by
/// the training components, so existing parameter files keep working.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DataProcessingArgs {
    /// One of "standard", "min_max", "none".
    pub data_standardization: String,
    /// One of "none", "upsampling_with_duplicates", "rose".
    pub data_sampling: String,
    pub rose_upsampled_minority_proportion: f64,
    pub rose_random_state: u64,
    pub rose_shrinkage: f64,
    pub upsampling_coefficient: usize,
}

impl Default for DataProcessingArgs {
    fn default() -> Self {
        Self {
            data_standardization: "standard".to_string(),
            data_sampling: "none".to_string(),
            rose_upsampled_minority_proportion: 0.01,
            rose_random_state: 42,
            rose_shrinkage: 1.0,
            upsampling_coefficient: 2,
        }
    }
}

impl DataProcessingArgs {
    /// Resolve the string options into typed values.
    pub fn resolve(&self) -> Result<(Option<ScalerKind>, SamplingStrategy)> {
        let scaler = build_scaler(&self.data_standardization)?;
        let sampling = SamplingStrategy::from_args(self)?;
        Ok((scaler, sampling))
    }
}

/// Arguments forwarded to the fit call of a classifier.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FitArgs {
    /// Stop after this many rounds without improvement on the eval set.
    pub early_stopping_rounds: Option<usize>,
    pub verbose: bool,
}

/// One member of a training cohort.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CandidateSpec {
    pub name: String,
    pub model: ModelConfig,
    #[serde(default)]
    pub data_processing: DataProcessingArgs,
    #[serde(default)]
    pub fit_args: FitArgs,
}

impl CandidateSpec {
    pub fn new(name: &str, model: ModelConfig) -> Self {
        Self {
            name: name.to_string(),
            model,
            data_processing: DataProcessingArgs::default(),
            fit_args: FitArgs::default(),
        }
    }

    /// Only the boosters are handed the validation split during fitting.
    pub fn use_eval_set(&self) -> bool {
        match self.model.model_type {
            #[cfg(feature = "xgboost")]
            ModelType::XGBoost { .. } => true,
            _ => false,
        }
    }
}

/// Process-wide configuration, built once at start-up and passed by reference.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Registry id under which every version of the model is stored.
    pub model_id: String,
    pub target_column: String,
    /// Row identifier excluded from the features.
    pub id_column: Option<String>,
    pub candidates: Vec<CandidateSpec>,
    pub metric_to_optimise: String,
    pub higher_is_better: bool,
    pub absolute_threshold: f64,
    pub precision_k: usize,
    /// Upper bound on concurrently trained candidates.
    pub max_parallel: usize,
    pub registry_root: PathBuf,
    pub artifact_dir: PathBuf,
    pub metrics_path: Option<PathBuf>,
    pub data_version: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_id: "credit-card-frauds".to_string(),
            target_column: "is_fraud".to_string(),
            id_column: Some("transaction_id".to_string()),
            candidates: vec![
                CandidateSpec::new(
                    "logistic_regression",
                    ModelConfig::new(
                        0.1,
                        ModelType::LogisticRegression {
                            c: 1.0,
                            max_iter: 1000,
                            tol: 1e-6,
                        },
                    ),
                ),
                CandidateSpec::new("gbdt", ModelConfig::default()),
            ],
            metric_to_optimise: "average_precision".to_string(),
            higher_is_better: true,
            absolute_threshold: 0.0,
            precision_k: 200,
            max_parallel: 2,
            registry_root: PathBuf::from("registry"),
            artifact_dir: PathBuf::from("artifacts"),
            metrics_path: None,
            data_version: None,
            labels: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Check every option that would otherwise only fail half-way through a cycle.
    pub fn validate(&self) -> Result<()> {
        if self.candidates.is_empty() {
            return Err(LifecycleError::Configuration(
                "at least one candidate must be configured".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for candidate in &self.candidates {
            if !seen.insert(candidate.name.as_str()) {
                return Err(LifecycleError::Configuration(format!(
                    "duplicate candidate name '{}'",
                    candidate.name
                )));
            }
            candidate.data_processing.resolve()?;
        }
        if !(self.absolute_threshold >= 0.0) {
            return Err(LifecycleError::Configuration(format!(
                "absolute_threshold must be >= 0, got {}",
                self.absolute_threshold
            )));
        }
        if self.max_parallel == 0 {
            return Err(LifecycleError::Configuration(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.precision_k == 0 {
            return Err(LifecycleError::Configuration(
                "precision_k must be at least 1".to_string(),
            ));
        }
        if !Metrics::is_known(&self.metric_to_optimise) {
            return Err(LifecycleError::UnknownMetric(
                self.metric_to_optimise.clone(),
            ));
        }
        Ok(())
    }
}

/// Load a pipeline configuration from a JSON file.
pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(&path)?;
    let config: PipelineConfig = serde_json::from_str(&content)?;
    log::debug!(
        "Loaded pipeline config from {} with {} candidates",
        path.as_ref().display(),
        config.candidates.len()
    );
    Ok(config)
}
