use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{FitArgs, ModelConfig, ModelType};
use crate::error::{LifecycleError, Result};
use crate::models::classifier_trait::{ClassifierModel, EvalSet};
use crate::models::FittedModel;

/// One bagged tree and the feature columns it was grown on.
#[derive(Serialize, Deserialize)]
pub struct ForestTree {
    pub features: Vec<usize>,
    pub tree: DecisionTree<f64, usize>,
}

/// Fitted random forest. The fraud probability is the share of trees voting 1.
#[derive(Serialize, Deserialize)]
pub struct Forest {
    pub n_features: usize,
    pub trees: Vec<ForestTree>,
}

impl Forest {
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(LifecycleError::InvalidInput(format!(
                "random forest expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let mut votes = Array1::<f64>::zeros(x.nrows());
        for member in &self.trees {
            let sub_x = x.select(Axis(1), &member.features);
            let pred: Array1<usize> = member.tree.predict(&sub_x);
            votes.zip_mut_with(&pred, |v, &p| *v += p as f64);
        }
        Ok(votes / self.trees.len().max(1) as f64)
    }

    pub fn check_is_fitted(&self) -> Result<()> {
        if self.trees.is_empty() || self.n_features == 0 {
            return Err(LifecycleError::NotFitted(
                "random forest has no trees".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bagged decision trees with a random feature subset per tree.
pub struct RandomForestClassifier {
    params: ModelConfig,
}

impl RandomForestClassifier {
    pub fn new(params: ModelConfig) -> Self {
        RandomForestClassifier { params }
    }
}

impl ClassifierModel for RandomForestClassifier {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<i32>,
        _eval: Option<EvalSet<'_>>,
        _fit_args: &FitArgs,
    ) -> Result<FittedModel> {
        let (n_estimators, max_depth, max_features, min_samples_split, random_state) =
            match &self.params.model_type {
                ModelType::RandomForest {
                    n_estimators,
                    max_depth,
                    max_features,
                    min_samples_split,
                    random_state,
                } => (
                    *n_estimators,
                    *max_depth,
                    *max_features,
                    *min_samples_split,
                    *random_state,
                ),
                other => {
                    return Err(LifecycleError::Configuration(format!(
                        "expected RandomForest params, got {:?}",
                        other
                    )))
                }
            };
        if n_estimators == 0 || !(max_features > 0.0 && max_features <= 1.0) {
            return Err(LifecycleError::Configuration(format!(
                "random forest needs n_estimators > 0 and max_features in (0, 1], got {} and {}",
                n_estimators, max_features
            )));
        }
        let (n_rows, n_features) = x.dim();
        if n_rows == 0 || n_rows != y.len() {
            return Err(LifecycleError::InvalidInput(format!(
                "cannot fit on {} rows with {} labels",
                n_rows,
                y.len()
            )));
        }
        let per_tree = ((max_features * n_features as f64).ceil() as usize).clamp(1, n_features);
        let targets = y.mapv(|label| if label == 1 { 1usize } else { 0 });

        let trees = (0..n_estimators)
            .into_par_iter()
            .map(|t| -> Result<ForestTree> {
                let mut rng = StdRng::seed_from_u64(random_state.wrapping_add(t as u64));
                let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                let mut features = sample(&mut rng, n_features, per_tree).into_vec();
                features.sort_unstable();

                let records = x.select(Axis(0), &rows).select(Axis(1), &features);
                let dataset = Dataset::new(records, targets.select(Axis(0), &rows));
                let tree = DecisionTree::params()
                    .max_depth(max_depth)
                    .min_weight_split(min_samples_split as f32)
                    .fit(&dataset)
                    .map_err(|e| LifecycleError::Model(format!("decision tree: {}", e)))?;
                Ok(ForestTree { features, tree })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "random forest: {} trees, {} of {} features each",
            trees.len(),
            per_tree,
            n_features
        );
        Ok(FittedModel::RandomForest(Forest { n_features, trees }))
    }

    fn name(&self) -> &str {
        "random_forest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Predictor;

    #[test]
    fn forest_scores_fraud_rows_higher() {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| {
            let fraud = i % 4 == 0;
            match j {
                0 if fraud => 5.0 + (i % 3) as f64,
                0 => (i % 5) as f64 * 0.1,
                _ => ((i * 7 + j) % 11) as f64,
            }
        });
        let y = Array1::from_shape_fn(40, |i| if i % 4 == 0 { 1 } else { 0 });

        let params = ModelConfig::new(
            0.1,
            ModelType::RandomForest {
                n_estimators: 15,
                max_depth: Some(4),
                max_features: 1.0,
                min_samples_split: 2,
                random_state: 7,
            },
        );
        let fitted = RandomForestClassifier::new(params)
            .fit(&x, &y, None, &FitArgs::default())
            .unwrap();
        fitted.check_is_fitted().unwrap();

        let proba = fitted.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(proba[0] > proba[1]);
        assert!(proba[4] > 0.5);
        assert!(proba[2] < 0.5);
    }

    #[test]
    fn rejects_invalid_feature_fraction() {
        let x = Array2::zeros((4, 2));
        let y = Array1::from(vec![0, 1, 0, 1]);
        let params = ModelConfig::new(
            0.1,
            ModelType::RandomForest {
                n_estimators: 3,
                max_depth: None,
                max_features: 0.0,
                min_samples_split: 2,
                random_state: 0,
            },
        );
        assert!(matches!(
            RandomForestClassifier::new(params).fit(&x, &y, None, &FitArgs::default()),
            Err(LifecycleError::Configuration(_))
        ));
    }
}
