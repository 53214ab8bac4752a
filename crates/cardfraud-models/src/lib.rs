//! cardfraud-models: model lifecycle engine for card-fraud detection.
//!
//! This crate trains a cohort of candidate classifiers (logistic regression,
//! SGD, random forest, GBDT and optional XGBoost) behind a shared
//! scaler/resampler harness, scores them with fraud-oriented metrics, picks
//! the best one and runs the champion/challenger promotion against a model
//! registry.
//!
//! Native dependencies (libxgboost) are only pulled in with the `xgboost`
//! feature.
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preprocessing;
pub mod promotion;
pub mod registry;
pub mod report;
pub mod resampling;
pub mod selection;
pub mod sink;
pub mod trainer;

pub use error::{LifecycleError, Result};
