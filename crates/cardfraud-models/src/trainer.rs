//! Training harness: scale, resample, fit, verify, score.
use std::collections::BTreeMap;

use ndarray::Array2;
use rayon::prelude::*;

use crate::config::{CandidateSpec, DataProcessingArgs, FitArgs};
use crate::data::Dataset;
use crate::error::{LifecycleError, Result};
use crate::metrics::{cross_validation_mean, evaluate, Metrics};
use crate::models::{build_model, ClassifierModel, EvalSet};
use crate::pipeline::{ModelPipeline, PipelineMetadata};
use crate::preprocessing::{fit_transform, ScalerKind};
use crate::resampling::{resample, SamplingStrategy};

/// Resolved training options for one candidate.
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub model_name: String,
    pub scaler: Option<ScalerKind>,
    pub sampling: SamplingStrategy,
    pub use_eval_set: bool,
    pub fit_args: FitArgs,
    pub precision_k: usize,
    /// Raw arguments, recorded in the artifact metadata.
    pub data_processing: DataProcessingArgs,
}

impl TrainingOptions {
    pub fn new(
        model_name: &str,
        data_processing: DataProcessingArgs,
        precision_k: usize,
    ) -> Result<Self> {
        let (scaler, sampling) = data_processing.resolve()?;
        Ok(Self {
            model_name: model_name.to_string(),
            scaler,
            sampling,
            use_eval_set: false,
            fit_args: FitArgs::default(),
            precision_k,
            data_processing,
        })
    }

    pub fn from_candidate(spec: &CandidateSpec, precision_k: usize) -> Result<Self> {
        let mut options = Self::new(&spec.name, spec.data_processing.clone(), precision_k)?;
        options.use_eval_set = spec.use_eval_set();
        options.fit_args = spec.fit_args.clone();
        Ok(options)
    }
}

/// Training split plus the optional validation split used for early stopping.
#[derive(Debug, Clone, Copy)]
pub struct TrainingData<'a> {
    pub train: &'a Dataset,
    pub valid: Option<&'a Dataset>,
}

impl<'a> TrainingData<'a> {
    pub fn new(train: &'a Dataset, valid: Option<&'a Dataset>) -> Self {
        Self { train, valid }
    }
}

#[derive(Debug)]
pub struct TrainOutcome {
    pub pipeline: ModelPipeline,
    pub train_metrics: Metrics,
}

/// Fit `classifier` on the training split and return the scaler/classifier
/// pipeline with its training metrics.
///
/// The scaler is fit on the training rows only; the validation rows are
/// transformed with it before being offered to the classifier as an eval set.
/// Training metrics are scored on the scaled training rows as they were
/// before resampling, so synthetic or duplicated frauds never count.
pub fn train(
    classifier: &dyn ClassifierModel,
    data: &TrainingData<'_>,
    options: &TrainingOptions,
) -> Result<TrainOutcome> {
    let train = data.train;
    if train.is_empty() {
        return Err(LifecycleError::InvalidInput(format!(
            "{}: empty training split",
            options.model_name
        )));
    }

    // 1. scaling, fit on train only
    let (scaler, x_train) = match options.scaler {
        Some(kind) => {
            let (scaler, x) = fit_transform(kind, &train.x)?;
            (Some(scaler), x)
        }
        None => (None, train.x.clone()),
    };
    let x_valid: Option<Array2<f64>> = match (data.valid, &scaler) {
        (Some(valid), Some(scaler)) => Some(scaler.transform(&valid.x)?),
        (Some(valid), None) => Some(valid.x.clone()),
        (None, _) => None,
    };

    // 2. resampling of the scaled training rows
    let (x_fit, y_fit) = resample(&x_train, &train.y, &options.sampling)?;

    // 3. fit, with the validation split as eval set when requested
    let eval = match (options.use_eval_set, data.valid, x_valid.as_ref()) {
        (true, Some(valid), Some(x)) if classifier.supports_eval_set() => {
            Some(EvalSet::new(x, &valid.y))
        }
        (true, _, _) => {
            log::debug!(
                "{}: eval set requested but not used by {}",
                options.model_name,
                classifier.name()
            );
            None
        }
        _ => None,
    };
    log::info!(
        "Training {} ({}) on {} rows",
        options.model_name,
        classifier.name(),
        y_fit.len()
    );
    let model = classifier.fit(&x_fit, &y_fit, eval, &options.fit_args)?;

    // 4. post-fit verification
    if let Some(scaler) = &scaler {
        scaler.check_is_fitted()?;
    }
    model.check_is_fitted()?;

    // 5. training metrics on the scaled, non-resampled training rows
    let train_metrics = evaluate(&model, &x_train, &train.y, options.precision_k)?.metrics;
    train_metrics.log(&format!("{} train", options.model_name));

    // 6. compose scaler and classifier into one artifact
    let metadata = PipelineMetadata::new(
        &options.model_name,
        train.feature_names.clone(),
        options.data_processing.clone(),
    );
    Ok(TrainOutcome {
        pipeline: ModelPipeline::new(scaler, model, metadata),
        train_metrics,
    })
}

/// A successfully trained cohort member.
#[derive(Debug)]
pub struct TrainedCandidate {
    pub name: String,
    pub pipeline: ModelPipeline,
    pub train_metrics: Metrics,
    pub valid_metrics: Option<Metrics>,
}

/// Result slot for one cohort member; failures are kept, not dropped.
#[derive(Debug)]
pub struct CandidateResult {
    pub name: String,
    pub outcome: Result<TrainedCandidate>,
}

impl CandidateResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Train one configured candidate and score it on the validation split.
pub fn train_candidate(
    spec: &CandidateSpec,
    train_set: &Dataset,
    valid_set: Option<&Dataset>,
    precision_k: usize,
) -> Result<TrainedCandidate> {
    let options = TrainingOptions::from_candidate(spec, precision_k)?;
    let classifier = build_model(spec.model.clone());
    let outcome = train(
        classifier.as_ref(),
        &TrainingData::new(train_set, valid_set),
        &options,
    )?;

    let valid_metrics = match valid_set {
        Some(valid) => {
            let metrics = evaluate(&outcome.pipeline, &valid.x, &valid.y, precision_k)?.metrics;
            metrics.log(&format!("{} validation", spec.name));
            Some(metrics)
        }
        None => None,
    };

    Ok(TrainedCandidate {
        name: spec.name.clone(),
        pipeline: outcome.pipeline,
        train_metrics: outcome.train_metrics,
        valid_metrics,
    })
}

/// Train every candidate on a pool of at most `max_parallel` threads.
///
/// Returns once all candidates have finished, one result per spec in input
/// order.
pub fn train_cohort(
    specs: &[CandidateSpec],
    train_set: &Dataset,
    valid_set: Option<&Dataset>,
    max_parallel: usize,
    precision_k: usize,
) -> Result<Vec<CandidateResult>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_parallel.max(1))
        .build()
        .map_err(|e| LifecycleError::Configuration(format!("training pool: {}", e)))?;

    let results: Vec<CandidateResult> = pool.install(|| {
        specs
            .par_iter()
            .map(|spec| {
                let outcome = train_candidate(spec, train_set, valid_set, precision_k);
                if let Err(e) = &outcome {
                    log::warn!("Candidate {} failed: {}", spec.name, e);
                }
                CandidateResult {
                    name: spec.name.clone(),
                    outcome,
                }
            })
            .collect()
    });

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    log::info!("Cohort finished: {}/{} candidates trained", succeeded, results.len());
    Ok(results)
}

/// Per-fold test metrics and their mean.
#[derive(Debug)]
pub struct CrossValidationSummary {
    pub folds: Vec<Metrics>,
    pub mean: BTreeMap<String, f64>,
}

/// K-fold cross-validation. Fold `i` holds out every row whose index is
/// congruent to `i` modulo `folds`.
pub fn cross_validate(
    classifier: &dyn ClassifierModel,
    dataset: &Dataset,
    folds: usize,
    options: &TrainingOptions,
) -> Result<CrossValidationSummary> {
    if folds < 2 || folds > dataset.len() {
        return Err(LifecycleError::Configuration(format!(
            "need between 2 and {} folds, got {}",
            dataset.len(),
            folds
        )));
    }

    let mut fold_metrics = Vec::with_capacity(folds);
    for fold in 0..folds {
        let (test_idx, train_idx): (Vec<usize>, Vec<usize>) =
            (0..dataset.len()).partition(|i| i % folds == fold);
        let train_set = dataset.select_rows(&train_idx)?;
        let test_set = dataset.select_rows(&test_idx)?;

        log::info!("Fold {}/{}", fold + 1, folds);
        let outcome = train(classifier, &TrainingData::new(&train_set, None), options)?;
        let evaluation = evaluate(
            &outcome.pipeline,
            &test_set.x,
            &test_set.y,
            options.precision_k,
        )?;
        fold_metrics.push(evaluation.metrics);
    }

    let mean = cross_validation_mean(&fold_metrics)?;
    for (name, value) in &mean {
        log::info!("Mean test {}: {:.6}", name, value);
    }
    Ok(CrossValidationSummary {
        folds: fold_metrics,
        mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, ModelType};
    use crate::models::linear::LinearModel;
    use crate::models::{FittedModel, Predictor};
    use ndarray::{array, Array1, Array2};
    use std::sync::Mutex;

    /// Records what `fit` receives and returns a model that flags every row.
    #[derive(Default)]
    struct RecordingClassifier {
        fit_rows: Mutex<usize>,
        eval: Mutex<Option<(Array2<f64>, Array1<i32>)>>,
    }

    impl ClassifierModel for RecordingClassifier {
        fn fit(
            &self,
            x: &Array2<f64>,
            _y: &Array1<i32>,
            eval: Option<EvalSet<'_>>,
            _fit_args: &FitArgs,
        ) -> Result<FittedModel> {
            *self.fit_rows.lock().unwrap() = x.nrows();
            *self.eval.lock().unwrap() = eval.map(|e| (e.x.clone(), e.y.clone()));
            Ok(FittedModel::Linear(LinearModel {
                weights: vec![0.0; x.ncols()],
                intercept: 10.0,
            }))
        }

        fn supports_eval_set(&self) -> bool {
            true
        }
    }

    fn dataset(n: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            let fraud = i % 5 == 0;
            if j == 0 {
                if fraud {
                    100.0 + i as f64
                } else {
                    10.0 + (i % 7) as f64
                }
            } else {
                (i % 3) as f64
            }
        });
        let y = Array1::from_shape_fn(n, |i| if i % 5 == 0 { 1 } else { 0 });
        Dataset::new(x, y, vec!["amount".to_string(), "hour".to_string()]).unwrap()
    }

    fn logistic() -> CandidateSpec {
        CandidateSpec::new(
            "logistic_regression",
            ModelConfig::new(0.5, "logistic_regression".parse().unwrap()),
        )
    }

    #[test]
    fn train_returns_a_scaled_pipeline_that_accepts_raw_rows() {
        let data = dataset(50);
        let options = TrainingOptions::from_candidate(&logistic(), 10).unwrap();
        let classifier = build_model(logistic().model);
        let outcome =
            train(classifier.as_ref(), &TrainingData::new(&data, None), &options).unwrap();

        assert!(outcome.pipeline.scaler.is_some());
        assert!(outcome.train_metrics.roc_auc > 0.9);
        let proba = outcome.pipeline.predict_proba(&data.x).unwrap();
        assert!(proba[0] > proba[1]);
        assert_eq!(outcome.pipeline.metadata.feature_names, data.feature_names);
    }

    #[test]
    fn unknown_sampling_fails_before_training() {
        let mut spec = logistic();
        spec.data_processing.data_sampling = "smote".to_string();
        let data = dataset(20);
        assert!(matches!(
            train_candidate(&spec, &data, None, 5),
            Err(LifecycleError::Configuration(_))
        ));
    }

    #[test]
    fn cohort_keeps_failures_in_input_order() {
        let data = dataset(40);
        let valid = dataset(20);
        let mut broken = CandidateSpec::new(
            "broken_forest",
            ModelConfig::new(
                0.1,
                ModelType::RandomForest {
                    n_estimators: 0,
                    max_depth: Some(3),
                    max_features: 1.0,
                    min_samples_split: 2,
                    random_state: 1,
                },
            ),
        );
        broken.data_processing.data_standardization = "min_max".to_string();
        let specs = vec![logistic(), broken, CandidateSpec::new("gbdt", ModelConfig::default())];

        let results = train_cohort(&specs, &data, Some(&valid), 2, 5).unwrap();
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["logistic_regression", "broken_forest", "gbdt"]);
        assert!(results[0].is_ok());
        assert!(!results[1].is_ok());
        assert!(results[2].is_ok());
        let trained = results[0].outcome.as_ref().unwrap();
        assert!(trained.valid_metrics.is_some());
    }

    #[test]
    fn cross_validation_reports_every_fold() {
        let data = dataset(30);
        let options = TrainingOptions::from_candidate(&logistic(), 3).unwrap();
        let classifier = build_model(logistic().model);
        let summary = cross_validate(classifier.as_ref(), &data, 3, &options).unwrap();
        assert_eq!(summary.folds.len(), 3);
        assert!(summary.mean.contains_key("average_precision"));
        assert!(cross_validate(classifier.as_ref(), &data, 1, &options).is_err());
    }

    #[test]
    fn eval_set_is_the_validation_split_scaled_with_training_statistics() {
        // mean 5 and population std 5 on the training rows
        let train_set = Dataset::new(
            array![[0.0], [10.0], [0.0], [10.0]],
            array![0, 1, 0, 1],
            vec!["amount".to_string()],
        )
        .unwrap();
        let valid_set =
            Dataset::new(array![[5.0], [15.0]], array![0, 1], vec!["amount".to_string()])
                .unwrap();
        let mut options =
            TrainingOptions::new("recorder", DataProcessingArgs::default(), 2).unwrap();
        options.use_eval_set = true;

        let classifier = RecordingClassifier::default();
        train(
            &classifier,
            &TrainingData::new(&train_set, Some(&valid_set)),
            &options,
        )
        .unwrap();

        let (x, y) = classifier.eval.lock().unwrap().take().unwrap();
        assert_eq!(x, array![[0.0], [2.0]]);
        assert_eq!(y, valid_set.y);
    }

    #[test]
    fn eval_set_is_withheld_unless_requested() {
        let data = dataset(10);
        let options = TrainingOptions::new("recorder", DataProcessingArgs::default(), 2).unwrap();
        let classifier = RecordingClassifier::default();
        train(&classifier, &TrainingData::new(&data, Some(&data)), &options).unwrap();
        assert!(classifier.eval.lock().unwrap().is_none());
    }

    #[test]
    fn training_metrics_ignore_resampled_rows() {
        // 10 frauds in 50 rows; duplicate upsampling adds 20 more
        let data = dataset(50);
        let mut args = DataProcessingArgs::default();
        args.data_sampling = "upsampling_with_duplicates".to_string();
        let options = TrainingOptions::new("recorder", args, 5).unwrap();

        let classifier = RecordingClassifier::default();
        let outcome = train(&classifier, &TrainingData::new(&data, None), &options).unwrap();

        assert_eq!(*classifier.fit_rows.lock().unwrap(), 70);
        assert!((outcome.train_metrics.precision - 0.2).abs() < 1e-12);
        assert!((outcome.train_metrics.recall - 1.0).abs() < 1e-12);
    }
}
