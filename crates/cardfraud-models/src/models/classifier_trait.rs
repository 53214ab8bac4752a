use ndarray::{Array1, Array2};

use crate::config::FitArgs;
use crate::error::Result;
use crate::models::FittedModel;

/// Held-out split passed to classifiers that support early stopping.
#[derive(Debug, Clone, Copy)]
pub struct EvalSet<'a> {
    pub x: &'a Array2<f64>,
    pub y: &'a Array1<i32>,
}

impl<'a> EvalSet<'a> {
    pub fn new(x: &'a Array2<f64>, y: &'a Array1<i32>) -> Self {
        Self { x, y }
    }
}

/// An unfitted estimator configuration.
///
/// `fit` borrows the configuration and returns a new fitted handle, so the
/// same estimator can be shared by cohort members trained in parallel.
/// Labels use 1 for fraud and 0 for legitimate transactions.
pub trait ClassifierModel: Send + Sync {
    fn fit(
        &self,
        x: &Array2<f64>,
        y: &Array1<i32>,
        eval: Option<EvalSet<'_>>,
        fit_args: &FitArgs,
    ) -> Result<FittedModel>;

    /// Whether `fit` makes use of an eval set. Others ignore it.
    fn supports_eval_set(&self) -> bool {
        false
    }

    /// Optional human readable name for the model
    fn name(&self) -> &str {
        "classifier"
    }
}

/// Anything that maps raw rows to fraud probabilities.
pub trait Predictor {
    /// Probability of class 1 for every row.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Hard labels, thresholding probabilities at 0.5.
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<i32>> {
        Ok(self.predict_proba(x)?.mapv(|p| if p > 0.5 { 1 } else { 0 }))
    }
}
