use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::{FitArgs, ModelConfig, ModelType};
use crate::error::{LifecycleError, Result};
use crate::models::classifier_trait::{ClassifierModel, EvalSet};
use crate::models::FittedModel;

const LOG_LIKELIHOOD: &str = "LogLikelyhood";

/// Trained booster plus what is needed to validate inputs against it.
#[derive(Serialize, Deserialize)]
pub struct GbdtModel {
    pub n_features: usize,
    pub iterations: usize,
    pub loss_type: String,
    pub booster: GBDT,
}

fn to_data_vec(x: &Array2<f64>, labels: Option<&[f32]>) -> DataVec {
    x.rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let features = row.iter().map(|&v| v as f32).collect();
            let label = labels.map_or(0.0, |l| l[i]);
            Data::new_training_data(features, 1.0, label, None)
        })
        .collect()
}

impl GbdtModel {
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(LifecycleError::InvalidInput(format!(
                "gbdt expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let test_x = to_data_vec(x, None);
        // LogLikelyhood already returns probabilities; other losses are clamped
        Ok(self
            .booster
            .predict(&test_x)
            .into_iter()
            .map(|p| f64::from(p).clamp(0.0, 1.0))
            .collect())
    }

    pub fn check_is_fitted(&self) -> Result<()> {
        if self.n_features == 0 || self.iterations == 0 {
            return Err(LifecycleError::NotFitted(
                "gbdt booster was never trained".to_string(),
            ));
        }
        Ok(())
    }
}

/// Gradient Boosting Decision Tree (GBDT) classifier
pub struct GBDTClassifier {
    params: ModelConfig,
}

impl GBDTClassifier {
    pub fn new(params: ModelConfig) -> Self {
        GBDTClassifier { params }
    }
}

impl ClassifierModel for GBDTClassifier {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<i32>,
        _eval: Option<EvalSet<'_>>,
        _fit_args: &FitArgs,
    ) -> Result<FittedModel> {
        let feature_size = x.ncols();
        if x.nrows() == 0 || x.nrows() != y.len() || feature_size == 0 {
            return Err(LifecycleError::InvalidInput(format!(
                "cannot fit gbdt on a {}x{} matrix with {} labels",
                x.nrows(),
                feature_size,
                y.len()
            )));
        }

        match &self.params.model_type {
            ModelType::GBDT {
                max_depth,
                num_boost_round,
                debug,
                training_optimization_level,
                loss_type,
            } => {
                let mut config = Config::new();

                config.set_feature_size(feature_size);
                config.set_shrinkage(self.params.learning_rate);
                config.set_max_depth(*max_depth);
                config.set_iterations(*num_boost_round as usize);
                config.set_debug(*debug);
                config.set_training_optimization_level(*training_optimization_level);
                config.set_loss(loss_type);

                // LogLikelyhood expects labels in {-1, 1}
                let labels: Vec<f32> = y
                    .iter()
                    .map(|&l| match (l, loss_type.as_str()) {
                        (1, _) => 1.0,
                        (_, LOG_LIKELIHOOD) => -1.0,
                        _ => 0.0,
                    })
                    .collect();
                let mut train_x = to_data_vec(x, Some(&labels));

                let mut booster = GBDT::new(&config);
                booster.fit(&mut train_x);

                Ok(FittedModel::Gbdt(GbdtModel {
                    n_features: feature_size,
                    iterations: *num_boost_round as usize,
                    loss_type: loss_type.clone(),
                    booster,
                }))
            }
            other => Err(LifecycleError::Configuration(format!(
                "expected GBDT params, got {:?}",
                other
            ))),
        }
    }

    fn name(&self) -> &str {
        "gbdt"
    }
}
