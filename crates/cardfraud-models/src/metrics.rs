//! Classification metrics for a fitted fraud model.
//!
//! All scores treat label 1 (fraud) as the positive class. Degenerate
//! inputs never produce NaN: a zero denominator yields 0, and ROC-AUC on a
//! single-class target yields 0.5.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{check_binary, check_xy};
use crate::error::{LifecycleError, Result};
use crate::models::Predictor;

/// Names accepted by [`Metrics::get`].
pub const METRIC_NAMES: [&str; 8] = [
    "precision",
    "recall",
    "f1",
    "f2",
    "f0.5",
    "average_precision",
    "precision_top_k",
    "roc_auc",
];

/// Precision/recall pairs for every distinct decision threshold.
///
/// Thresholds are ascending; `precision` and `recall` have one more entry
/// than `thresholds`, the final (1, 0) point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrecisionRecallCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub thresholds: Vec<f64>,
}

/// Metrics record for one (model, dataset) evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub f2: f64,
    #[serde(rename = "f0.5")]
    pub f05: f64,
    pub average_precision: f64,
    pub precision_top_k: f64,
    pub roc_auc: f64,
    pub precision_recall_curve: PrecisionRecallCurve,
}

impl Metrics {
    pub fn is_known(name: &str) -> bool {
        METRIC_NAMES.contains(&name)
    }

    /// Look a scalar metric up by its configured name.
    pub fn get(&self, name: &str) -> Result<f64> {
        let value = match name {
            "precision" => self.precision,
            "recall" => self.recall,
            "f1" => self.f1,
            "f2" => self.f2,
            "f0.5" => self.f05,
            "average_precision" => self.average_precision,
            "precision_top_k" => self.precision_top_k,
            "roc_auc" => self.roc_auc,
            other => return Err(LifecycleError::UnknownMetric(other.to_string())),
        };
        Ok(value)
    }

    /// Every scalar metric keyed by name, for the metrics sink.
    pub fn scalars(&self) -> BTreeMap<String, f64> {
        METRIC_NAMES
            .iter()
            .filter_map(|name| self.get(name).ok().map(|v| (name.to_string(), v)))
            .collect()
    }

    pub fn log(&self, label: &str) {
        for (name, value) in self.scalars() {
            log::info!("{} {}: {:.6}", label, name, value);
        }
    }
}

/// Output of [`evaluate`].
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub metrics: Metrics,
    pub predictions: Array1<i32>,
    pub probabilities: Array1<f64>,
}

/// Run `model` on `x` and score it against `y`.
pub fn evaluate<P: Predictor + ?Sized>(
    model: &P,
    x: &Array2<f64>,
    y: &Array1<i32>,
    k: usize,
) -> Result<Evaluation> {
    check_xy(x, y)?;
    let predictions = model.predict(x)?;
    let probabilities = model.predict_proba(x)?;
    let metrics = compute_metrics(y, &predictions, &probabilities, k)?;

    let n_frauds = y.iter().filter(|&&v| v == 1).count();
    let n_predicted = predictions.iter().filter(|&&v| v == 1).count();
    let n_correct = y
        .iter()
        .zip(predictions.iter())
        .filter(|(&t, &p)| t == 1 && p == 1)
        .count();
    log::info!(
        "Frauds correctly predicted: {}, predicted: {}, total: {}",
        n_correct,
        n_predicted,
        n_frauds
    );

    Ok(Evaluation {
        metrics,
        predictions,
        probabilities,
    })
}

/// Compute the full metrics record from labels, hard predictions and
/// fraud probabilities.
pub fn compute_metrics(
    y: &Array1<i32>,
    predictions: &Array1<i32>,
    probabilities: &Array1<f64>,
    k: usize,
) -> Result<Metrics> {
    if predictions.len() != y.len() || probabilities.len() != y.len() {
        return Err(LifecycleError::InvalidInput(format!(
            "{} labels, {} predictions, {} probabilities",
            y.len(),
            predictions.len(),
            probabilities.len()
        )));
    }
    check_binary(y)?;
    check_binary(predictions)?;
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(LifecycleError::InvalidInput(
            "predicted probabilities must be finite".to_string(),
        ));
    }

    let y = y.to_vec();
    let predictions = predictions.to_vec();
    let probabilities = probabilities.to_vec();

    let curve = precision_recall_curve(&y, &probabilities);
    Ok(Metrics {
        precision: precision_score(&y, &predictions),
        recall: recall_score(&y, &predictions),
        f1: fbeta_score(&y, &predictions, 1.0),
        f2: fbeta_score(&y, &predictions, 2.0),
        f05: fbeta_score(&y, &predictions, 0.5),
        average_precision: average_precision_from_curve(&curve),
        precision_top_k: precision_at_k(&y, &probabilities, k),
        roc_auc: roc_auc_score(&y, &probabilities),
        precision_recall_curve: curve,
    })
}

/// Mean of every scalar metric over cross-validation folds.
pub fn cross_validation_mean(folds: &[Metrics]) -> Result<BTreeMap<String, f64>> {
    if folds.is_empty() {
        return Err(LifecycleError::InvalidInput(
            "no folds to average".to_string(),
        ));
    }
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    for fold in folds {
        for (name, value) in fold.scalars() {
            *sums.entry(name).or_insert(0.0) += value;
        }
    }
    let n = folds.len() as f64;
    Ok(sums.into_iter().map(|(name, sum)| (name, sum / n)).collect())
}

fn confusion(y: &[i32], predictions: &[i32]) -> (usize, usize, usize) {
    let mut tp = 0;
    let mut fp = 0;
    let mut fn_ = 0;
    for (&t, &p) in y.iter().zip(predictions) {
        match (t, p) {
            (1, 1) => tp += 1,
            (0, 1) => fp += 1,
            (1, 0) => fn_ += 1,
            _ => {}
        }
    }
    (tp, fp, fn_)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn precision_score(y: &[i32], predictions: &[i32]) -> f64 {
    let (tp, fp, _) = confusion(y, predictions);
    ratio(tp, tp + fp)
}

pub fn recall_score(y: &[i32], predictions: &[i32]) -> f64 {
    let (tp, _, fn_) = confusion(y, predictions);
    ratio(tp, tp + fn_)
}

/// Weighted harmonic mean of precision and recall.
pub fn fbeta_score(y: &[i32], predictions: &[i32], beta: f64) -> f64 {
    let p = precision_score(y, predictions);
    let r = recall_score(y, predictions);
    let b2 = beta * beta;
    let den = b2 * p + r;
    if den == 0.0 {
        0.0
    } else {
        (1.0 + b2) * p * r / den
    }
}

/// Row indices ordered by descending score. Ties keep input order.
fn rank_descending(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

/// Fraction of frauds among the `k` highest-scored rows.
///
/// `k` is clamped to the number of rows; `k == 0` or empty input gives 0.
pub fn precision_at_k(y: &[i32], probabilities: &[f64], k: usize) -> f64 {
    let k = k.min(y.len());
    if k == 0 {
        return 0.0;
    }
    let hits = rank_descending(probabilities)
        .into_iter()
        .take(k)
        .filter(|&i| y[i] == 1)
        .count();
    hits as f64 / k as f64
}

/// Cumulative (true positive, false positive) counts at each distinct score,
/// highest score first, paired with that score.
fn cumulative_counts(y: &[i32], scores: &[f64]) -> Vec<(f64, usize, usize)> {
    let order = rank_descending(scores);
    let mut points = Vec::new();
    let mut tp = 0;
    let mut fp = 0;
    for (pos, &i) in order.iter().enumerate() {
        if y[i] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_run = order
            .get(pos + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if last_of_run {
            points.push((scores[i], tp, fp));
        }
    }
    points
}

pub fn precision_recall_curve(y: &[i32], scores: &[f64]) -> PrecisionRecallCurve {
    let total_pos = y.iter().filter(|&&v| v == 1).count();
    let points = cumulative_counts(y, scores);

    let mut curve = PrecisionRecallCurve::default();
    for &(threshold, tp, fp) in points.iter().rev() {
        curve.thresholds.push(threshold);
        curve.precision.push(ratio(tp, tp + fp));
        curve.recall.push(ratio(tp, total_pos));
    }
    curve.precision.push(1.0);
    curve.recall.push(0.0);
    curve
}

fn average_precision_from_curve(curve: &PrecisionRecallCurve) -> f64 {
    curve
        .recall
        .windows(2)
        .zip(&curve.precision)
        .map(|(r, p)| (r[0] - r[1]) * p)
        .sum()
}

/// Step-wise area under the precision/recall curve. 0 when `y` has no frauds.
pub fn average_precision_score(y: &[i32], scores: &[f64]) -> f64 {
    average_precision_from_curve(&precision_recall_curve(y, scores))
}

/// Area under the ROC curve using the trapezoidal rule. Tied scores count
/// half. Returns 0.5 when only one class is present.
pub fn roc_auc_score(y: &[i32], scores: &[f64]) -> f64 {
    let total_pos = y.iter().filter(|&&v| v == 1).count() as f64;
    let total_neg = y.len() as f64 - total_pos;
    if total_pos == 0.0 || total_neg == 0.0 {
        return 0.5;
    }

    let mut auc = 0.0;
    let mut prev_tp = 0.0;
    let mut prev_fp = 0.0;
    for (_, tp, fp) in cumulative_counts(y, scores) {
        let (tp, fp) = (tp as f64, fp as f64);
        auc += (fp - prev_fp) * (tp + prev_tp) / 2.0;
        prev_tp = tp;
        prev_fp = fp;
    }
    auc / (total_pos * total_neg)
}
