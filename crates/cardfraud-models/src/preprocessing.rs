//! Feature scaling applied in front of every classifier.
//!
//! A scaler is fit on the training split only and then applied, without
//! refitting, to validation/test data and at inference time. The fitted
//! state is stored inside the model pipeline artifact.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

/// Which standardization transform to fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    /// Zero mean, unit variance.
    Standard,
    /// Rescale each feature to [0, 1].
    MinMax,
}

impl fmt::Display for ScalerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalerKind::Standard => write!(f, "standard"),
            ScalerKind::MinMax => write!(f, "min_max"),
        }
    }
}

/// Parse a standardization option. `"none"` means no scaler.
pub fn build_scaler(kind: &str) -> Result<Option<ScalerKind>> {
    match kind {
        "standard" => Ok(Some(ScalerKind::Standard)),
        "min_max" => Ok(Some(ScalerKind::MinMax)),
        "none" => Ok(None),
        other => {
            let msg = format!(
                "`data_standardization` parameter not correctly set: '{}'. It should have one \
                 of the following values: 'standard', 'min_max', 'none'.",
                other
            );
            log::error!("{}", msg);
            Err(LifecycleError::Configuration(msg))
        }
    }
}

impl FromStr for ScalerKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        build_scaler(s)?.ok_or_else(|| {
            LifecycleError::Configuration("'none' does not name a scaler".to_string())
        })
    }
}

impl ScalerKind {
    /// Fit the per-column statistics. Rows are samples, columns features.
    pub fn fit(self, x: &Array2<f64>) -> Result<Scaler> {
        let (nrows, ncols) = x.dim();
        if nrows == 0 || ncols == 0 {
            return Err(LifecycleError::InvalidInput(
                "cannot fit a scaler on an empty matrix".to_string(),
            ));
        }

        let scaler = match self {
            ScalerKind::Standard => {
                let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
                    LifecycleError::InvalidInput("empty matrix".to_string())
                })?;
                let scale = x
                    .std_axis(Axis(0), 0.0)
                    .mapv(|s| if s > Scaler::MIN_SCALE { s } else { 1.0 });
                Scaler::Standard {
                    mean: mean.to_vec(),
                    scale: scale.to_vec(),
                }
            }
            ScalerKind::MinMax => {
                let mut min = vec![f64::INFINITY; ncols];
                let mut max = vec![f64::NEG_INFINITY; ncols];
                for row in x.rows() {
                    for (c, &v) in row.iter().enumerate() {
                        min[c] = min[c].min(v);
                        max[c] = max[c].max(v);
                    }
                }
                let scale = min
                    .iter()
                    .zip(max.iter())
                    .map(|(lo, hi)| {
                        let range = hi - lo;
                        if range > Scaler::MIN_SCALE {
                            range
                        } else {
                            1.0
                        }
                    })
                    .collect();
                Scaler::MinMax { min, scale }
            }
        };
        log::debug!("Fitted {} scaler on {} rows x {} features", self, nrows, ncols);
        Ok(scaler)
    }
}

/// Fitted scaler state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaler {
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    MinMax { min: Vec<f64>, scale: Vec<f64> },
}

impl Scaler {
    /// Columns with a spread below this are left unscaled.
    const MIN_SCALE: f64 = 1e-12;

    pub fn kind(&self) -> ScalerKind {
        match self {
            Scaler::Standard { .. } => ScalerKind::Standard,
            Scaler::MinMax { .. } => ScalerKind::MinMax,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Scaler::Standard { mean, .. } => mean.len(),
            Scaler::MinMax { min, .. } => min.len(),
        }
    }

    fn offset_and_scale(&self) -> (&[f64], &[f64]) {
        match self {
            Scaler::Standard { mean, scale } => (mean, scale),
            Scaler::MinMax { min, scale } => (min, scale),
        }
    }

    /// Verify the scaler carries usable statistics.
    pub fn check_is_fitted(&self) -> Result<()> {
        let (offset, scale) = self.offset_and_scale();
        if offset.is_empty()
            || offset.len() != scale.len()
            || scale.iter().any(|s| !s.is_finite() || *s <= 0.0)
            || offset.iter().any(|o| !o.is_finite())
        {
            return Err(LifecycleError::NotFitted(format!(
                "{} scaler has no usable statistics",
                self.kind()
            )));
        }
        Ok(())
    }

    /// Apply the fitted transform and return a new matrix.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (offset, scale) = self.offset_and_scale();
        if x.ncols() != offset.len() {
            return Err(LifecycleError::InvalidInput(format!(
                "scaler was fit on {} features but got {}",
                offset.len(),
                x.ncols()
            )));
        }

        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = (*v - offset[c]) / scale[c];
            }
        }
        Ok(out)
    }
}

/// Fit a scaler of the given kind and return it with the transformed matrix.
pub fn fit_transform(kind: ScalerKind, x: &Array2<f64>) -> Result<(Scaler, Array2<f64>)> {
    let scaler = kind.fit(x)?;
    let transformed = scaler.transform(x)?;
    Ok((scaler, transformed))
}
