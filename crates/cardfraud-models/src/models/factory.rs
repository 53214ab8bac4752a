use crate::config::{ModelConfig, ModelType};
use crate::models::classifier_trait::ClassifierModel;

/// Build a boxed classifier model from a `ModelConfig`.
pub fn build_model(params: ModelConfig) -> Box<dyn ClassifierModel> {
    if !params.uses_learning_rate() {
        log::debug!(
            "learning_rate {} has no effect on {}",
            params.learning_rate,
            params.model_type.name()
        );
    }
    match params.model_type {
        ModelType::LogisticRegression { .. } => {
            Box::new(crate::models::linear::LogisticRegressionClassifier::new(params))
        }

        ModelType::SgdClassifier { .. } => {
            Box::new(crate::models::linear::SgdClassifier::new(params))
        }

        ModelType::RandomForest { .. } => {
            Box::new(crate::models::forest::RandomForestClassifier::new(params))
        }

        #[cfg(feature = "xgboost")]
        ModelType::XGBoost { .. } => {
            Box::new(crate::models::xgboost::XGBoostClassifier::new(params))
        }

        ModelType::GBDT { .. } => Box::new(crate::models::gbdt::GBDTClassifier::new(params)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CandidateSpec;

    #[test]
    fn factory_picks_the_configured_family() {
        for name in ["logistic_regression", "sgd_classifier", "random_forest", "gbdt"] {
            let model_type: ModelType = name.parse().unwrap();
            let model = build_model(ModelConfig::new(0.1, model_type));
            assert_eq!(model.name(), name);
        }
        assert!("svm".parse::<ModelType>().is_err());
    }

    #[test]
    fn sgd_supports_an_eval_set_but_only_boosters_receive_one() {
        let sgd_config = ModelConfig::new(0.1, "sgd_classifier".parse().unwrap());
        let sgd = build_model(sgd_config.clone());
        let gbdt = build_model(ModelConfig::default());
        assert!(sgd.supports_eval_set());
        assert!(!gbdt.supports_eval_set());

        assert!(!CandidateSpec::new("sgd", sgd_config).use_eval_set());
        assert!(!CandidateSpec::new("gbdt", ModelConfig::default()).use_eval_set());
    }

    #[cfg(feature = "xgboost")]
    #[test]
    fn xgboost_candidates_receive_the_eval_set() {
        let config = ModelConfig::new(0.1, "xgboost".parse().unwrap());
        assert!(CandidateSpec::new("xgb", config).use_eval_set());
    }

    #[test]
    fn learning_rate_is_read_by_gradient_models_only() {
        for (name, expected) in [
            ("logistic_regression", true),
            ("gbdt", true),
            ("sgd_classifier", false),
            ("random_forest", false),
        ] {
            let config = ModelConfig::new(0.1, name.parse().unwrap());
            assert_eq!(config.uses_learning_rate(), expected, "{}", name);
        }
    }
}
