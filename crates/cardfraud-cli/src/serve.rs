//! HTTP inference boundary for a saved pipeline.
//!
//! `GET /health` answers `Healthy`; `POST /predict` takes
//! `{"instances": [...]}` where each instance is either a row of feature
//! values in training order or an object keyed by feature name.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use cardfraud_models::models::Predictor;
use cardfraud_models::pipeline::ModelPipeline;
use cardfraud_models::LifecycleError;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ModelPipeline>,
}

impl AppState {
    pub fn new(pipeline: ModelPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Instance {
    Values(Vec<f64>),
    Named(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub fraud_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Stack instances into a feature matrix in training column order.
pub fn instances_to_matrix(
    instances: &[Instance],
    feature_names: &[String],
) -> Result<Array2<f64>, String> {
    let first = instances.first().ok_or("no instances given")?;
    let n_features = if feature_names.is_empty() {
        match first {
            Instance::Values(values) => values.len(),
            Instance::Named(_) => {
                return Err("model has no feature names; send rows as arrays".to_string())
            }
        }
    } else {
        feature_names.len()
    };

    let mut values = Vec::with_capacity(instances.len() * n_features);
    for (i, instance) in instances.iter().enumerate() {
        match instance {
            Instance::Values(row) => {
                if row.len() != n_features {
                    return Err(format!(
                        "instance {} has {} values, expected {}",
                        i,
                        row.len(),
                        n_features
                    ));
                }
                values.extend_from_slice(row);
            }
            Instance::Named(fields) => {
                for name in feature_names {
                    let value = fields
                        .get(name)
                        .ok_or_else(|| format!("instance {} is missing feature '{}'", i, name))?;
                    values.push(*value);
                }
            }
        }
    }
    Array2::from_shape_vec((instances.len(), n_features), values).map_err(|e| e.to_string())
}

pub async fn health() -> &'static str {
    "Healthy"
}

pub async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let x = instances_to_matrix(&request.instances, &state.pipeline.metadata.feature_names)
        .map_err(bad_request)?;

    let probabilities = state.pipeline.predict_proba(&x).map_err(|e| match e {
        LifecycleError::InvalidInput(message) => bad_request(message),
        other => {
            log::error!("Prediction failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: other.to_string(),
                }),
            )
        }
    })?;

    log::debug!("Scored {} instances", probabilities.len());
    Ok(Json(PredictResponse {
        predictions: probabilities
            .iter()
            .map(|&p| Prediction {
                fraud_probability: p,
            })
            .collect(),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .with_state(state)
}

pub async fn run_server(pipeline: ModelPipeline, addr: SocketAddr) -> anyhow::Result<()> {
    log::info!("Serving {} on {}", pipeline.name(), addr);
    let app = router(AppState::new(pipeline));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardfraud_models::config::DataProcessingArgs;
    use cardfraud_models::models::linear::LinearModel;
    use cardfraud_models::models::FittedModel;
    use cardfraud_models::pipeline::PipelineMetadata;

    fn test_state() -> AppState {
        let model = FittedModel::Linear(LinearModel {
            weights: vec![1.0, 0.0],
            intercept: 0.0,
        });
        let metadata = PipelineMetadata::new(
            "logistic_regression",
            vec!["amount".to_string(), "hour".to_string()],
            DataProcessingArgs::default(),
        );
        AppState::new(ModelPipeline::new(None, model, metadata))
    }

    fn request(json: serde_json::Value) -> Result<Json<PredictRequest>, JsonRejection> {
        Ok(Json(serde_json::from_value(json).unwrap()))
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "Healthy");
    }

    #[tokio::test]
    async fn test_predict_rows_and_named_instances() {
        let body = request(serde_json::json!({
            "instances": [[0.0, 3.0], {"hour": 1.0, "amount": 0.0}]
        }));
        let Json(response) = predict(State(test_state()), body).await.unwrap();
        assert_eq!(response.predictions.len(), 2);
        for prediction in &response.predictions {
            assert!((prediction.fraud_probability - 0.5).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_predict_wrong_width_is_bad_request() {
        let body = request(serde_json::json!({ "instances": [[1.0, 2.0, 3.0]] }));
        let (status, Json(error)) = predict(State(test_state()), body).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error.error.contains("expected 2"));
    }

    #[tokio::test]
    async fn test_predict_missing_feature_is_bad_request() {
        let body = request(serde_json::json!({ "instances": [{"amount": 1.0}] }));
        let (status, _) = predict(State(test_state()), body).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_empty_is_bad_request() {
        let body = request(serde_json::json!({ "instances": [] }));
        let (status, _) = predict(State(test_state()), body).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
