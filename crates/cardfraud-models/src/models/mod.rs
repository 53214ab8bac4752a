use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod classifier_trait;
pub mod factory;
pub mod forest;
pub mod gbdt;
pub mod linear;
#[cfg(feature = "xgboost")]
pub mod xgboost;

pub use classifier_trait::{ClassifierModel, EvalSet, Predictor};
pub use factory::build_model;

/// A trained classifier, as returned by [`ClassifierModel::fit`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FittedModel {
    Linear(linear::LinearModel),
    RandomForest(forest::Forest),
    Gbdt(gbdt::GbdtModel),
    #[cfg(feature = "xgboost")]
    #[serde(rename = "xgboost")]
    XGBoost(xgboost::XGBoostModel),
}

impl FittedModel {
    pub fn kind(&self) -> &'static str {
        match self {
            FittedModel::Linear(_) => "linear",
            FittedModel::RandomForest(_) => "random_forest",
            FittedModel::Gbdt(_) => "gbdt",
            #[cfg(feature = "xgboost")]
            FittedModel::XGBoost(_) => "xgboost",
        }
    }

    /// Post-fit verification; `NotFitted` when the model carries no usable state.
    pub fn check_is_fitted(&self) -> Result<()> {
        match self {
            FittedModel::Linear(m) => m.check_is_fitted(),
            FittedModel::RandomForest(m) => m.check_is_fitted(),
            FittedModel::Gbdt(m) => m.check_is_fitted(),
            #[cfg(feature = "xgboost")]
            FittedModel::XGBoost(m) => m.check_is_fitted(),
        }
    }
}

impl Predictor for FittedModel {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            FittedModel::Linear(m) => m.predict_proba(x),
            FittedModel::RandomForest(m) => m.predict_proba(x),
            FittedModel::Gbdt(m) => m.predict_proba(x),
            #[cfg(feature = "xgboost")]
            FittedModel::XGBoost(m) => m.predict_proba(x),
        }
    }
}

impl fmt::Debug for FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FittedModel({})", self.kind())
    }
}
