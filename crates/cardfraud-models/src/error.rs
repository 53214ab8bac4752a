use thiserror::Error;

/// Failures raised by the model lifecycle engine.
///
/// None of these are retried inside the crate; retries belong to whatever
/// orchestrates the training runs.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Unknown standardization/sampling/model value or an invalid parameter.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Post-fit verification failed for a classifier or scaler.
    #[error("not fitted: {0}")]
    NotFitted(String),

    /// Shape or label mismatch entering the evaluator or a model.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    /// Every candidate of a cohort failed.
    #[error("no candidates available for selection")]
    NoCandidates,

    #[error("registry error: {0}")]
    Registry(String),

    /// The underlying learning library reported a failure.
    #[error("model backend error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = LifecycleError::Configuration("bad sampling 'smote'".to_string());
        assert!(err.to_string().contains("smote"));

        let err = LifecycleError::UnknownMetric("accuracy".to_string());
        assert_eq!(err.to_string(), "unknown metric 'accuracy'");

        let err = LifecycleError::NoCandidates;
        assert!(err.to_string().contains("no candidates"));
    }
}
