//! Pick the best model of a cohort on a shared test split.
use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::error::{LifecycleError, Result};
use crate::metrics::{evaluate, Metrics};
use crate::models::Predictor;

/// A named model competing in a selection round.
pub struct Candidate<'a> {
    pub name: &'a str,
    pub model: &'a dyn Predictor,
}

impl<'a> Candidate<'a> {
    pub fn new(name: &'a str, model: &'a dyn Predictor) -> Self {
        Self { name, model }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub best_index: usize,
    pub best_name: String,
    pub metric: String,
    /// The metric value of every candidate, in input order.
    pub values: Vec<f64>,
    pub metrics: Vec<Metrics>,
}

impl Selection {
    pub fn best_value(&self) -> f64 {
        self.values[self.best_index]
    }

    pub fn best_metrics(&self) -> &Metrics {
        &self.metrics[self.best_index]
    }
}

/// Index of the best value. On ties the earliest index wins; NaN never wins.
pub fn best_index(values: &[f64], higher_is_better: bool) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        let better = match best {
            None => true,
            Some(b) if higher_is_better => v > values[b],
            Some(b) => v < values[b],
        };
        if better {
            best = Some(i);
        }
    }
    best
}

/// Evaluate every candidate on `(test_x, test_y)` and pick the best by `metric`.
pub fn select_best(
    candidates: &[Candidate<'_>],
    test_x: &Array2<f64>,
    test_y: &Array1<i32>,
    metric: &str,
    higher_is_better: bool,
    k: usize,
) -> Result<Selection> {
    if candidates.is_empty() {
        return Err(LifecycleError::NoCandidates);
    }
    if !Metrics::is_known(metric) {
        return Err(LifecycleError::UnknownMetric(metric.to_string()));
    }

    let mut values = Vec::with_capacity(candidates.len());
    let mut metrics = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        log::info!("Evaluating candidate {} on the test split", candidate.name);
        let evaluation = evaluate(candidate.model, test_x, test_y, k)?;
        let value = evaluation.metrics.get(metric)?;
        log::info!("{} {}: {:.6}", candidate.name, metric, value);
        values.push(value);
        metrics.push(evaluation.metrics);
    }

    let best = best_index(&values, higher_is_better).ok_or(LifecycleError::NoCandidates)?;
    log::info!(
        "Best candidate: {} ({} = {:.6})",
        candidates[best].name,
        metric,
        values[best]
    );
    Ok(Selection {
        best_index: best,
        best_name: candidates[best].name.to_string(),
        metric: metric.to_string(),
        values,
        metrics,
    })
}
