use std::fs;
use std::path::Path;

use ndarray::Array1;
use plotly::common::Mode;
use plotly::layout::{Axis, Layout};
use plotly::{Histogram, Plot, Scatter};

use crate::error::{LifecycleError, Result};
use crate::metrics::PrecisionRecallCurve;

/// Plot recall against precision for every decision threshold.
pub fn plot_precision_recall_curve(curve: &PrecisionRecallCurve, model_name: &str) -> Plot {
    let trace = Scatter::new(curve.recall.clone(), curve.precision.clone())
        .mode(Mode::Lines)
        .name(model_name);

    let layout = Layout::new()
        .title(format!("Precision-recall curve: {}", model_name).as_str())
        .x_axis(Axis::new().title("Recall"))
        .y_axis(Axis::new().title("Precision"));

    let mut plot = Plot::new();
    plot.add_trace(trace);
    plot.set_layout(layout);
    plot
}

/// Histogram of predicted fraud probabilities, split by true label.
pub fn plot_score_histogram(
    probabilities: &Array1<f64>,
    labels: &Array1<i32>,
    title: &str,
) -> Result<Plot> {
    if probabilities.len() != labels.len() {
        return Err(LifecycleError::InvalidInput(
            "scores and labels must have the same length".to_string(),
        ));
    }

    let (fraud, legit): (Vec<_>, Vec<_>) = probabilities
        .iter()
        .zip(labels.iter())
        .partition(|(_, &label)| label == 1);
    let fraud: Vec<f64> = fraud.into_iter().map(|(p, _)| *p).collect();
    let legit: Vec<f64> = legit.into_iter().map(|(p, _)| *p).collect();

    let layout = Layout::new()
        .title(title)
        .x_axis(Axis::new().title("Fraud probability"))
        .y_axis(Axis::new().title("Count"));

    let mut plot = Plot::new();
    plot.add_trace(Histogram::new(legit).name("Legitimate"));
    plot.add_trace(Histogram::new(fraud).name("Fraud"));
    plot.set_layout(layout);
    Ok(plot)
}

/// Write a plot as a standalone HTML file.
pub fn write_report<P: AsRef<Path>>(path: P, plot: &Plot) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, plot.to_html())?;
    log::info!("Wrote report {}", path.display());
    Ok(())
}
