use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use xgb::{
    parameters::{
        learning::{LearningTaskParametersBuilder, Objective},
        tree::{TreeBoosterParametersBuilder, TreeMethod},
        BoosterParametersBuilder, BoosterType,
    },
    Booster, DMatrix,
};

use crate::config::{FitArgs, ModelConfig, ModelType};
use crate::error::{LifecycleError, Result};
use crate::metrics::roc_auc_score;
use crate::models::classifier_trait::{ClassifierModel, EvalSet};
use crate::models::FittedModel;

fn backend<E: std::fmt::Display>(e: E) -> LifecycleError {
    LifecycleError::Model(format!("xgboost: {}", e))
}

fn to_dmatrix(x: &Array2<f64>, y: Option<&Array1<i32>>) -> Result<DMatrix> {
    debug!("Creating DMatrix from dense data: rows={}, cols={}", x.nrows(), x.ncols());
    let dense: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    let mut dmat = DMatrix::from_dense(&dense, x.nrows()).map_err(backend)?;
    if let Some(y) = y {
        let labels: Vec<f32> = y.iter().map(|&l| l as f32).collect();
        dmat.set_labels(&labels).map_err(backend)?;
    }
    Ok(dmat)
}

/// Serialized booster. Kept as bytes so the fitted model is `Send + Sync`
/// and round-trips through the pipeline artifact.
#[derive(Clone, Serialize, Deserialize)]
pub struct XGBoostModel {
    pub n_features: usize,
    pub best_iteration: usize,
    pub buffer: Vec<u8>,
}

impl XGBoostModel {
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(LifecycleError::InvalidInput(format!(
                "xgboost expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let booster = Booster::load_buffer(&self.buffer).map_err(backend)?;
        let dmat = to_dmatrix(x, None)?;
        let preds = booster.predict(&dmat).map_err(backend)?;
        Ok(preds.into_iter().map(f64::from).collect())
    }

    pub fn check_is_fitted(&self) -> Result<()> {
        if self.buffer.is_empty() || self.n_features == 0 {
            return Err(LifecycleError::NotFitted(
                "xgboost booster is empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct XGBoostClassifier {
    params: ModelConfig,
}

impl XGBoostClassifier {
    pub fn new(params: ModelConfig) -> Self {
        XGBoostClassifier { params }
    }
}

impl ClassifierModel for XGBoostClassifier {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<i32>,
        eval: Option<EvalSet<'_>>,
        fit_args: &FitArgs,
    ) -> Result<FittedModel> {
        let (max_depth, num_boost_round, early_stopping_rounds, verbose_eval) =
            match &self.params.model_type {
                ModelType::XGBoost {
                    max_depth,
                    num_boost_round,
                    early_stopping_rounds,
                    verbose_eval,
                } => (
                    *max_depth,
                    *num_boost_round,
                    *early_stopping_rounds as usize,
                    *verbose_eval || fit_args.verbose,
                ),
                other => {
                    return Err(LifecycleError::Configuration(format!(
                        "expected XGBoost params, got {:?}",
                        other
                    )))
                }
            };
        let patience = fit_args.early_stopping_rounds.unwrap_or(early_stopping_rounds);

        let dmat = to_dmatrix(x, Some(y))?;
        let eval_matrix = eval.map(|e| to_dmatrix(e.x, Some(e.y))).transpose()?;

        let learning_params = LearningTaskParametersBuilder::default()
            .objective(Objective::BinaryLogistic)
            .build()
            .map_err(backend)?;
        let tree_params = TreeBoosterParametersBuilder::default()
            .tree_method(TreeMethod::Hist)
            .max_depth(max_depth)
            .eta(self.params.learning_rate)
            .build()
            .map_err(backend)?;
        let booster_params = BoosterParametersBuilder::default()
            .booster_type(BoosterType::Tree(tree_params))
            .learning_params(learning_params)
            .verbose(verbose_eval)
            .build()
            .map_err(backend)?;

        let mut cached_dmats: Vec<&DMatrix> = vec![&dmat];
        if let Some(ref m) = eval_matrix {
            cached_dmats.push(m);
        }
        let mut bst =
            Booster::new_with_cached_dmats(&booster_params, &cached_dmats).map_err(backend)?;

        // explicit update loop so the eval AUC can drive early stopping
        let mut best: Option<(f64, usize, Vec<u8>)> = None;
        for i in 0..num_boost_round as i32 {
            bst.update(&dmat, i).map_err(backend)?;

            let (Some(evals), Some(eval)) = (eval_matrix.as_ref(), eval) else {
                continue;
            };
            let preds: Vec<f64> = bst
                .predict(evals)
                .map_err(backend)?
                .into_iter()
                .map(f64::from)
                .collect();
            let labels = eval.y.to_vec();
            let auc = roc_auc_score(&labels, &preds);
            if verbose_eval {
                debug!("[{}]\t eval_auc:{}", i, auc);
            }

            let round = i as usize;
            let stale_since = best
                .as_ref()
                .filter(|(best_auc, _, _)| auc <= *best_auc)
                .map(|(_, best_round, _)| *best_round);
            let Some(best_round) = stale_since else {
                best = Some((auc, round, bst.save_buffer(false).map_err(backend)?));
                continue;
            };
            if patience > 0 && round - best_round >= patience {
                debug!("early stopping at round {} (best {})", round, best_round);
                break;
            }
        }

        let (best_iteration, buffer) = match best {
            Some((_, round, buffer)) => (round, buffer),
            None => (
                (num_boost_round as usize).saturating_sub(1),
                bst.save_buffer(false).map_err(backend)?,
            ),
        };
        debug!("model dump size after training = {} bytes", buffer.len());

        Ok(FittedModel::XGBoost(XGBoostModel {
            n_features: x.ncols(),
            best_iteration,
            buffer,
        }))
    }

    fn supports_eval_set(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "xgboost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Predictor;

    #[test]
    fn test_xgboost_classifier() {
        let x = Array2::from_shape_vec(
            (10, 5),
            vec![
                0.1, 1.0, 5.0, 0.2, -0.3, 0.4, -1.0, 5.0, 0.8, 0.1, 0.6, 1.0, 5.0, 1.2, 0.2, 0.9,
                -1.0, 5.0, 1.8, -0.1, 1.2, 1.0, 5.0, 2.4, 0.3, 1.5, -1.0, 5.0, 3.0, 0.0, 1.8, 1.0,
                5.0, 3.6, -0.2, 2.1, -1.0, 5.0, 4.2, 0.4, 2.4, 1.0, 5.0, 4.8, -0.1, 2.7, -1.0, 5.0,
                5.4, 0.2,
            ],
        )
        .unwrap();
        let y = Array1::from_vec(vec![1, 0, 1, 0, 1, 0, 1, 0, 1, 0]);

        let params = ModelConfig::new(
            0.3,
            ModelType::XGBoost {
                max_depth: 6,
                num_boost_round: 50,
                early_stopping_rounds: 10,
                verbose_eval: true,
            },
        );
        let fitted = XGBoostClassifier::new(params)
            .fit(&x, &y, Some(EvalSet::new(&x, &y)), &FitArgs::default())
            .unwrap();
        fitted.check_is_fitted().unwrap();

        let proba = fitted.predict_proba(&x).unwrap();
        assert_eq!(proba.len(), 10);
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
