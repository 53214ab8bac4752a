//! Champion/challenger promotion.
//!
//! A cycle moves the best candidate of a cohort through
//! `TrainedCandidate -> Challenger -> {Champion | Rejected}`. When no
//! champion exists yet the challenger is promoted without a comparison.
//! The champion alias only moves at the very end of a successful cycle, so
//! any failure leaves the incumbent in place.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::data::Dataset;
use crate::error::{LifecycleError, Result};
use crate::metrics::{evaluate, Metrics};
use crate::models::Predictor;
use crate::pipeline::{load_pipeline, save_pipeline};
use crate::registry::{
    ModelRegistry, ModelVersion, UploadRequest, CHALLENGER_ALIAS, CHAMPION_ALIAS,
};
use crate::selection::{select_best, Candidate, Selection};
use crate::sink::MetricsSink;
use crate::trainer::CandidateResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    TrainedCandidate,
    /// Best of its cohort, tagged "challenger".
    Challenger,
    Champion,
    /// Lost to the champion; keeps only the "challenger" alias.
    Rejected,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::TrainedCandidate => "trained_candidate",
            LifecycleStage::Challenger => "challenger",
            LifecycleStage::Champion => "champion",
            LifecycleStage::Rejected => "rejected",
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strict improvement test of the challenger over the champion.
pub fn should_promote(
    champion_metric: f64,
    challenger_metric: f64,
    higher_is_better: bool,
    absolute_threshold: f64,
) -> bool {
    if higher_is_better {
        challenger_metric > champion_metric + absolute_threshold
    } else {
        challenger_metric < champion_metric - absolute_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PromotionDecision {
    pub is_better: bool,
    pub champion_metric: f64,
    pub challenger_metric: f64,
}

/// Score both models on the same test split and apply [`should_promote`].
#[allow(clippy::too_many_arguments)]
pub fn compare_champion_challenger(
    champion: &dyn Predictor,
    challenger: &dyn Predictor,
    test_x: &Array2<f64>,
    test_y: &Array1<i32>,
    metric: &str,
    absolute_threshold: f64,
    higher_is_better: bool,
    k: usize,
) -> Result<PromotionDecision> {
    if !Metrics::is_known(metric) {
        return Err(LifecycleError::UnknownMetric(metric.to_string()));
    }
    let champion_metric = evaluate(champion, test_x, test_y, k)?.metrics.get(metric)?;
    log::info!("Champion {}: {:.6}", metric, champion_metric);
    let challenger_metric = evaluate(challenger, test_x, test_y, k)?.metrics.get(metric)?;
    log::info!("Challenger {}: {:.6}", metric, challenger_metric);

    let is_better = should_promote(
        champion_metric,
        challenger_metric,
        higher_is_better,
        absolute_threshold,
    );
    Ok(PromotionDecision {
        is_better,
        champion_metric,
        challenger_metric,
    })
}

/// Settings of one promotion cycle.
#[derive(Debug, Clone)]
pub struct PromotionPolicy {
    pub model_id: String,
    pub metric_to_optimise: String,
    pub higher_is_better: bool,
    pub absolute_threshold: f64,
    pub precision_k: usize,
    /// Scratch space for the challenger artifact and the exported champion.
    pub work_dir: PathBuf,
    pub labels: BTreeMap<String, String>,
    pub data_version: Option<String>,
    pub pipeline_timestamp: String,
}

impl PromotionPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            metric_to_optimise: config.metric_to_optimise.clone(),
            higher_is_better: config.higher_is_better,
            absolute_threshold: config.absolute_threshold,
            precision_k: config.precision_k,
            work_dir: config.artifact_dir.clone(),
            labels: config.labels.clone(),
            data_version: config.data_version.clone(),
            pipeline_timestamp: Utc::now().format("%Y%m%dT%H%M%S").to_string(),
        }
    }
}

/// Everything a cycle decided, for reporting.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub selection: Selection,
    /// Candidates left out because they failed to train.
    pub excluded: Vec<String>,
    pub challenger: ModelVersion,
    pub stage: LifecycleStage,
    /// `None` when there was no champion to compare against.
    pub decision: Option<PromotionDecision>,
    pub previous_champion: Option<ModelVersion>,
}

impl CycleOutcome {
    pub fn promoted(&self) -> bool {
        self.stage == LifecycleStage::Champion
    }
}

/// Select the best trained candidate, register it as challenger and promote
/// it if it beats the current champion.
pub fn run_promotion_cycle(
    registry: &dyn ModelRegistry,
    sink: &dyn MetricsSink,
    cohort: &[CandidateResult],
    test: &Dataset,
    policy: &PromotionPolicy,
) -> Result<CycleOutcome> {
    let mut excluded = Vec::new();
    let trained: Vec<_> = cohort
        .iter()
        .filter_map(|result| match &result.outcome {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                log::warn!("Excluding candidate {}: {}", result.name, e);
                excluded.push(result.name.clone());
                None
            }
        })
        .collect();
    if trained.is_empty() {
        return Err(LifecycleError::NoCandidates);
    }

    let candidates: Vec<Candidate<'_>> = trained
        .iter()
        .map(|c| Candidate::new(&c.name, &c.pipeline))
        .collect();
    let selection = select_best(
        &candidates,
        &test.x,
        &test.y,
        &policy.metric_to_optimise,
        policy.higher_is_better,
        policy.precision_k,
    )?;
    let winner = trained[selection.best_index];

    let mut selection_metrics: BTreeMap<String, f64> = selection
        .best_metrics()
        .scalars()
        .into_iter()
        .map(|(name, value)| (format!("best.{}", name), value))
        .collect();
    for (candidate, value) in trained.iter().zip(&selection.values) {
        selection_metrics.insert(
            format!("{}.{}", candidate.name, policy.metric_to_optimise),
            *value,
        );
    }
    sink.log_metrics("selection", &selection_metrics)?;

    // TrainedCandidate -> Challenger
    let artifact = policy.work_dir.join("challenger").join(&winner.name).join("model.json");
    save_pipeline(&winner.pipeline, &artifact)?;
    let mut request = UploadRequest::new(&policy.model_id, &artifact);
    request.labels = policy.labels.clone();
    request.aliases = vec![CHALLENGER_ALIAS.to_string()];
    request.model_name = Some(winner.name.clone());
    request.pipeline_timestamp = Some(policy.pipeline_timestamp.clone());
    request.data_version = policy.data_version.clone();
    let challenger = registry.upload(&request)?;
    log::info!(
        "{} registered as challenger (version {})",
        winner.name,
        challenger.version
    );

    let previous_champion = registry.lookup(&policy.model_id, CHAMPION_ALIAS)?;
    let decision = match &previous_champion {
        None => {
            log::info!("No champion found, promoting the challenger unconditionally");
            None
        }
        Some(champion) => {
            let exported = registry.export_model(champion, &policy.work_dir.join("champion"))?;
            let champion_pipeline = load_pipeline(&exported)?;
            let decision = compare_champion_challenger(
                &champion_pipeline,
                &winner.pipeline,
                &test.x,
                &test.y,
                &policy.metric_to_optimise,
                policy.absolute_threshold,
                policy.higher_is_better,
                policy.precision_k,
            )?;
            Some(decision)
        }
    };

    let promote = decision.map_or(true, |d| d.is_better);
    let stage = if promote {
        registry.merge_version_aliases(
            &policy.model_id,
            challenger.version,
            &[CHAMPION_ALIAS.to_string()],
        )?;
        log::info!("Version {} is the new champion", challenger.version);
        LifecycleStage::Champion
    } else {
        log::info!(
            "Challenger version {} rejected, champion unchanged",
            challenger.version
        );
        LifecycleStage::Rejected
    };

    let mut promotion_metrics = BTreeMap::new();
    promotion_metrics.insert("promoted".to_string(), if promote { 1.0 } else { 0.0 });
    promotion_metrics.insert("challenger_version".to_string(), f64::from(challenger.version));
    if let Some(d) = &decision {
        promotion_metrics.insert("champion_metric".to_string(), d.champion_metric);
        promotion_metrics.insert("challenger_metric".to_string(), d.challenger_metric);
    }
    sink.log_metrics("promotion", &promotion_metrics)?;

    Ok(CycleOutcome {
        selection,
        excluded,
        challenger,
        stage,
        decision,
        previous_champion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::linear::LinearModel;
    use crate::models::FittedModel;
    use ndarray::array;

    fn amount_model(sign: f64) -> FittedModel {
        FittedModel::Linear(LinearModel {
            weights: vec![sign],
            intercept: -2.5 * sign,
        })
    }

    #[test]
    fn promotion_requires_strict_improvement() {
        assert!(!should_promote(0.80, 0.80, true, 0.0));
        assert!(should_promote(0.80, 0.801, true, 0.0));
        // 0.75 > 0.72 + 0.02, but not > 0.72 + 0.05
        assert!(should_promote(0.72, 0.75, true, 0.02));
        assert!(should_promote(0.72, 0.75, true, 0.01));
        assert!(!should_promote(0.72, 0.75, true, 0.05));
    }

    #[test]
    fn lower_is_better_flips_the_comparison() {
        assert!(should_promote(0.30, 0.20, false, 0.05));
        assert!(!should_promote(0.30, 0.28, false, 0.05));
        assert!(!should_promote(0.30, 0.30, false, 0.0));
    }

    #[test]
    fn stage_names() {
        assert_eq!(LifecycleStage::Rejected.to_string(), "rejected");
        assert_eq!(
            serde_json::to_string(&LifecycleStage::TrainedCandidate).unwrap(),
            "\"trained_candidate\""
        );
    }

    #[test]
    fn comparison_scores_both_models_on_the_test_split() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0, 0, 0, 0, 1, 1];
        let (good, bad) = (amount_model(1.0), amount_model(-1.0));

        let decision =
            compare_champion_challenger(&bad, &good, &x, &y, "roc_auc", 0.0, true, 2).unwrap();
        assert!(decision.is_better);
        assert!((decision.challenger_metric - 1.0).abs() < 1e-12);
        assert!(decision.champion_metric < 0.5);
    }

    #[test]
    fn comparison_rejects_unknown_metric() {
        let x = array![[0.0], [5.0]];
        let y = array![0, 1];
        let model = amount_model(1.0);
        let result = compare_champion_challenger(&model, &model, &x, &y, "accuracy", 0.0, true, 1);
        assert!(matches!(result, Err(LifecycleError::UnknownMetric(m)) if m == "accuracy"));
    }
}
