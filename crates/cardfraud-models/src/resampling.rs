//! Class-balancing strategies applied to the training split.
//!
//! Every strategy returns new arrays; the inputs are left untouched so a
//! single split can be shared by several candidates.

use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::config::DataProcessingArgs;
use crate::error::{LifecycleError, Result};

/// Oversampling of the minority (label 1) class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    None,
    /// Append `coefficient` exact copies of every minority row.
    UpsamplingWithDuplicates { coefficient: usize },
    /// Random over-sampling examples (smoothed bootstrap).
    Rose {
        /// Target share of the minority class after resampling, in (0, 1).
        minority_proportion: f64,
        shrinkage: f64,
        random_state: u64,
    },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        SamplingStrategy::None
    }
}

impl SamplingStrategy {
    /// Resolve the `data_sampling` option and its parameters.
    pub fn from_args(args: &DataProcessingArgs) -> Result<Self> {
        let strategy = match args.data_sampling.as_str() {
            "none" => SamplingStrategy::None,
            "upsampling_with_duplicates" => {
                if args.upsampling_coefficient == 0 {
                    return Err(LifecycleError::Configuration(
                        "upsampling_coefficient must be a positive integer".to_string(),
                    ));
                }
                SamplingStrategy::UpsamplingWithDuplicates {
                    coefficient: args.upsampling_coefficient,
                }
            }
            "rose" => {
                let p = args.rose_upsampled_minority_proportion;
                if !(p > 0.0 && p < 1.0) {
                    return Err(LifecycleError::Configuration(format!(
                        "rose_upsampled_minority_proportion must be in (0, 1), got {}",
                        p
                    )));
                }
                if !(args.rose_shrinkage >= 0.0) {
                    return Err(LifecycleError::Configuration(format!(
                        "rose_shrinkage must be non-negative, got {}",
                        args.rose_shrinkage
                    )));
                }
                SamplingStrategy::Rose {
                    minority_proportion: p,
                    shrinkage: args.rose_shrinkage,
                    random_state: args.rose_random_state,
                }
            }
            other => {
                let msg = format!(
                    "`data_sampling` parameter not correctly set: '{}'. It should have one of \
                     the following values: 'none', 'upsampling_with_duplicates', 'rose'.",
                    other
                );
                log::error!("{}", msg);
                return Err(LifecycleError::Configuration(msg));
            }
        };
        Ok(strategy)
    }
}

/// Apply `strategy` to a training split and return the balanced copy.
pub fn resample(
    x: &Array2<f64>,
    y: &Array1<i32>,
    strategy: &SamplingStrategy,
) -> Result<(Array2<f64>, Array1<i32>)> {
    if x.nrows() != y.len() {
        return Err(LifecycleError::InvalidInput(format!(
            "feature rows ({}) and labels ({}) differ in length",
            x.nrows(),
            y.len()
        )));
    }

    match strategy {
        SamplingStrategy::None => Ok((x.to_owned(), y.to_owned())),
        SamplingStrategy::UpsamplingWithDuplicates { coefficient } => {
            upsample_with_duplicates(x, y, *coefficient)
        }
        SamplingStrategy::Rose {
            minority_proportion,
            shrinkage,
            random_state,
        } => rose(x, y, *minority_proportion, *shrinkage, *random_state),
    }
}

fn minority_indices(y: &Array1<i32>) -> Vec<usize> {
    y.iter()
        .enumerate()
        .filter(|(_, &label)| label == 1)
        .map(|(i, _)| i)
        .collect()
}

fn upsample_with_duplicates(
    x: &Array2<f64>,
    y: &Array1<i32>,
    coefficient: usize,
) -> Result<(Array2<f64>, Array1<i32>)> {
    let minority = minority_indices(y);
    let tiled: Vec<usize> = (0..coefficient).flat_map(|_| minority.iter().copied()).collect();

    let extra_x = x.select(Axis(0), &tiled);
    let extra_y = Array1::<i32>::ones(tiled.len());

    let x_out = concatenate![Axis(0), x.view(), extra_x.view()];
    let y_out = concatenate![Axis(0), y.view(), extra_y.view()];

    log::info!(
        "Upsampled {} fraud rows x{}: {} -> {} training rows",
        minority.len(),
        coefficient,
        y.len(),
        y_out.len()
    );
    Ok((x_out, y_out))
}

fn rose(
    x: &Array2<f64>,
    y: &Array1<i32>,
    minority_proportion: f64,
    shrinkage: f64,
    random_state: u64,
) -> Result<(Array2<f64>, Array1<i32>)> {
    let minority = minority_indices(y);
    let n_min = minority.len();
    let n_maj = y.len() - n_min;
    if n_min == 0 {
        return Err(LifecycleError::InvalidInput(
            "rose needs at least one minority row in the training split".to_string(),
        ));
    }

    // relative size of minority to majority after resampling
    let ratio = minority_proportion / (1.0 - minority_proportion);
    let n_samples = (ratio * n_maj as f64).round() as i64 - n_min as i64;
    if n_samples < 0 {
        return Err(LifecycleError::Configuration(format!(
            "rose_upsampled_minority_proportion {} would remove {} minority rows",
            minority_proportion, -n_samples
        )));
    }
    let n_samples = n_samples as usize;

    let mut rng = StdRng::seed_from_u64(random_state);
    let picks: Vec<usize> = (0..n_samples)
        .map(|_| minority[rng.gen_range(0..n_min)])
        .collect();
    let mut synthetic = x.select(Axis(0), &picks);

    if shrinkage > 0.0 && n_samples > 0 {
        let minority_x = x.select(Axis(0), &minority);
        let n_features = x.ncols() as f64;
        let smoothing =
            (4.0 / ((n_features + 2.0) * n_min as f64)).powf(1.0 / (n_features + 4.0));
        let ddof = if n_min > 1 { 1.0 } else { 0.0 };
        let bandwidth = minority_x
            .std_axis(Axis(0), ddof)
            .mapv(|s| shrinkage * smoothing * s);

        let noise = Normal::new(0.0, 1.0)
            .map_err(|e| LifecycleError::Model(format!("normal distribution: {}", e)))?;
        for mut row in synthetic.rows_mut() {
            for (v, h) in row.iter_mut().zip(bandwidth.iter()) {
                *v += h * rng.sample(noise);
            }
        }
    }

    let x_out = concatenate![Axis(0), x.view(), synthetic.view()];
    let y_out = concatenate![Axis(0), y.view(), Array1::<i32>::ones(n_samples).view()];

    log::info!(
        "ROSE generated {} synthetic fraud rows (proportion {}, shrinkage {}): {} -> {} rows",
        n_samples,
        minority_proportion,
        shrinkage,
        y.len(),
        y_out.len()
    );
    Ok((x_out, y_out))
}
