//! Linear classifiers on the logistic link: batch logistic regression and a
//! per-sample SGD classifier.
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::{FitArgs, ModelConfig, ModelType};
use crate::error::{LifecycleError, Result};
use crate::models::classifier_trait::{ClassifierModel, EvalSet};
use crate::models::FittedModel;

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Fitted weights of a linear model on the logistic link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    fn zeros(n_features: usize) -> Self {
        Self {
            weights: vec![0.0; n_features],
            intercept: 0.0,
        }
    }

    fn margin(&self, row: ArrayView1<f64>) -> f64 {
        row.iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.intercept
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.weights.len() {
            return Err(LifecycleError::InvalidInput(format!(
                "linear model expects {} features, got {}",
                self.weights.len(),
                x.ncols()
            )));
        }
        Ok(x.rows().into_iter().map(|row| sigmoid(self.margin(row))).collect())
    }

    pub fn check_is_fitted(&self) -> Result<()> {
        if self.weights.is_empty()
            || !self.intercept.is_finite()
            || self.weights.iter().any(|w| !w.is_finite())
        {
            return Err(LifecycleError::NotFitted(
                "linear model has no finite coefficients".to_string(),
            ));
        }
        Ok(())
    }

    /// Mean log loss on a labelled split.
    fn log_loss(&self, x: &Array2<f64>, y: &Array1<i32>) -> f64 {
        const EPS: f64 = 1e-15;
        let n = y.len().max(1) as f64;
        x.rows()
            .into_iter()
            .zip(y.iter())
            .map(|(row, &label)| {
                let p = sigmoid(self.margin(row)).clamp(EPS, 1.0 - EPS);
                if label == 1 {
                    -p.ln()
                } else {
                    -(1.0 - p).ln()
                }
            })
            .sum::<f64>()
            / n
    }
}

fn check_training_input(x: &Array2<f64>, y: &Array1<i32>) -> Result<()> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return Err(LifecycleError::InvalidInput(format!(
            "cannot fit on {} rows with {} labels",
            x.nrows(),
            y.len()
        )));
    }
    Ok(())
}

/// L2-regularised logistic regression, fit by full-batch gradient descent.
pub struct LogisticRegressionClassifier {
    params: ModelConfig,
}

impl LogisticRegressionClassifier {
    pub fn new(params: ModelConfig) -> Self {
        LogisticRegressionClassifier { params }
    }
}

impl ClassifierModel for LogisticRegressionClassifier {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<i32>,
        _eval: Option<EvalSet<'_>>,
        _fit_args: &FitArgs,
    ) -> Result<FittedModel> {
        let (c, max_iter, tol) = match &self.params.model_type {
            ModelType::LogisticRegression { c, max_iter, tol } => (*c, *max_iter, *tol),
            other => {
                return Err(LifecycleError::Configuration(format!(
                    "expected LogisticRegression params, got {:?}",
                    other
                )))
            }
        };
        if !(c > 0.0) {
            return Err(LifecycleError::Configuration(format!(
                "logistic regression C must be positive, got {}",
                c
            )));
        }
        check_training_input(x, y)?;

        let n = x.nrows() as f64;
        let step = f64::from(self.params.learning_rate);
        let targets = y.mapv(f64::from);
        let mut w = Array1::<f64>::zeros(x.ncols());
        let mut b = 0.0;

        let mut iterations = 0;
        for it in 0..max_iter {
            iterations = it + 1;
            let z = x.dot(&w) + b;
            let residual = z.mapv(sigmoid) - &targets;

            let grad_w = x.t().dot(&residual) / n + &w / (c * n);
            let grad_b = residual.sum() / n;

            w.scaled_add(-step, &grad_w);
            b -= step * grad_b;

            let max_grad = grad_w.iter().fold(grad_b.abs(), |m, g| m.max(g.abs()));
            if max_grad < tol {
                break;
            }
        }
        log::debug!(
            "logistic regression stopped after {} iterations (C={})",
            iterations,
            c
        );

        Ok(FittedModel::Linear(LinearModel {
            weights: w.to_vec(),
            intercept: b,
        }))
    }

    fn name(&self) -> &str {
        "logistic_regression"
    }
}

/// Linear classifier trained sample by sample on the log loss.
///
/// With an eval set the weights of the best validation epoch are kept and
/// training stops after `n_iter_no_change` epochs without improvement.
pub struct SgdClassifier {
    params: ModelConfig,
}

impl SgdClassifier {
    pub fn new(params: ModelConfig) -> Self {
        SgdClassifier { params }
    }
}

impl ClassifierModel for SgdClassifier {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<i32>,
        eval: Option<EvalSet<'_>>,
        fit_args: &FitArgs,
    ) -> Result<FittedModel> {
        let (alpha, eta0, max_epochs, n_iter_no_change, random_state) =
            match &self.params.model_type {
                ModelType::SgdClassifier {
                    alpha,
                    eta0,
                    max_epochs,
                    n_iter_no_change,
                    random_state,
                } => (*alpha, *eta0, *max_epochs, *n_iter_no_change, *random_state),
                other => {
                    return Err(LifecycleError::Configuration(format!(
                        "expected SgdClassifier params, got {:?}",
                        other
                    )))
                }
            };
        check_training_input(x, y)?;
        let patience = fit_args.early_stopping_rounds.unwrap_or(n_iter_no_change).max(1);

        let mut rng = StdRng::seed_from_u64(random_state);
        let mut order: Vec<usize> = (0..x.nrows()).collect();
        let mut model = LinearModel::zeros(x.ncols());
        let mut best = model.clone();
        let mut best_loss = f64::INFINITY;
        let mut stale_epochs = 0;

        for epoch in 0..max_epochs {
            order.shuffle(&mut rng);
            for &i in &order {
                let row = x.index_axis(Axis(0), i);
                let g = sigmoid(model.margin(row)) - f64::from(y[i]);
                for (w, xi) in model.weights.iter_mut().zip(row.iter()) {
                    *w -= eta0 * (g * xi + alpha * *w);
                }
                model.intercept -= eta0 * g;
            }

            let loss = match eval {
                Some(eval) => model.log_loss(eval.x, eval.y),
                None => model.log_loss(x, y),
            };
            if fit_args.verbose {
                log::info!("[{}] sgd log_loss: {:.6}", epoch, loss);
            }
            if loss < best_loss {
                best_loss = loss;
                best = model.clone();
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
                if stale_epochs >= patience {
                    log::debug!("sgd early stop at epoch {} (best loss {:.6})", epoch, best_loss);
                    break;
                }
            }
        }

        Ok(FittedModel::Linear(best))
    }

    fn supports_eval_set(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "sgd_classifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Predictor;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Array1<i32>) {
        let x = array![
            [-2.0, 0.1],
            [-1.5, -0.3],
            [-1.0, 0.2],
            [-0.8, 0.0],
            [0.8, 0.1],
            [1.0, -0.2],
            [1.5, 0.3],
            [2.0, 0.0]
        ];
        let y = array![0, 0, 0, 0, 1, 1, 1, 1];
        (x, y)
    }

    #[test]
    fn logistic_regression_separates_classes() {
        let (x, y) = separable();
        let params = ModelConfig::new(0.5, "logistic_regression".parse().unwrap());
        let fitted = LogisticRegressionClassifier::new(params)
            .fit(&x, &y, None, &FitArgs::default())
            .unwrap();
        fitted.check_is_fitted().unwrap();

        let proba = fitted.predict_proba(&x).unwrap();
        assert!(proba[0] < 0.5 && proba[7] > 0.5);
        assert_eq!(fitted.predict(&x).unwrap(), y);
    }

    #[test]
    fn sgd_is_reproducible_for_a_seed_and_uses_eval_set() {
        let (x, y) = separable();
        let params = ModelConfig::new(0.1, "sgd_classifier".parse().unwrap());
        let clf = SgdClassifier::new(params);
        assert!(clf.supports_eval_set());

        let eval = EvalSet::new(&x, &y);
        let a = clf.fit(&x, &y, Some(eval), &FitArgs::default()).unwrap();
        let b = clf.fit(&x, &y, Some(eval), &FitArgs::default()).unwrap();
        let pa = a.predict_proba(&x).unwrap();
        let pb = b.predict_proba(&x).unwrap();
        assert_eq!(pa, pb);
        assert!(pa[7] > pa[0]);
    }

    #[test]
    fn wrong_params_are_a_configuration_error() {
        let (x, y) = separable();
        let clf = LogisticRegressionClassifier::new(ModelConfig::default());
        assert!(matches!(
            clf.fit(&x, &y, None, &FitArgs::default()),
            Err(LifecycleError::Configuration(_))
        ));
    }

    #[test]
    fn empty_model_is_not_fitted() {
        let model = LinearModel::zeros(0);
        assert!(matches!(
            model.check_is_fitted(),
            Err(LifecycleError::NotFitted(_))
        ));
    }
}
