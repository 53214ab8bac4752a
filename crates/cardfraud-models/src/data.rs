//! Transaction tables, labelled or not, and train/validation/test partitioning.
use std::path::Path;

use csv::StringRecord;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

/// Feature matrix plus binary fraud labels (1 = fraud).
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub y: Array1<i32>,
    pub feature_names: Vec<String>,
    /// Row identifiers, kept out of the features.
    pub ids: Option<Vec<String>>,
}

impl Dataset {
    pub fn new(x: Array2<f64>, y: Array1<i32>, feature_names: Vec<String>) -> Result<Self> {
        check_xy(&x, &y)?;
        if feature_names.len() != x.ncols() {
            return Err(LifecycleError::InvalidInput(format!(
                "{} feature names for {} feature columns",
                feature_names.len(),
                x.ncols()
            )));
        }
        Ok(Self {
            x,
            y,
            feature_names,
            ids: None,
        })
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Result<Self> {
        if ids.len() != self.len() {
            return Err(LifecycleError::InvalidInput(format!(
                "{} ids for {} rows",
                ids.len(),
                self.len()
            )));
        }
        self.ids = Some(ids);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn positive_count(&self) -> usize {
        self.y.iter().filter(|&&v| v == 1).count()
    }

    /// Copy the given rows into a new dataset.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(LifecycleError::InvalidInput(format!(
                "row index {} out of range for {} rows",
                bad,
                self.len()
            )));
        }
        Ok(Self {
            x: self.x.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
            feature_names: self.feature_names.clone(),
            ids: self
                .ids
                .as_ref()
                .map(|ids| indices.iter().map(|&i| ids[i].clone()).collect()),
        })
    }

    /// Reorder the feature columns to `names`, dropping any others.
    pub fn with_feature_order(&self, names: &[String]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|name| {
                self.feature_names
                    .iter()
                    .position(|f| f == name)
                    .ok_or_else(|| {
                        LifecycleError::InvalidInput(format!("missing feature column '{}'", name))
                    })
            })
            .collect::<Result<Vec<usize>>>()?;
        Ok(Self {
            x: self.x.select(Axis(1), &indices),
            y: self.y.clone(),
            feature_names: names.to_vec(),
            ids: self.ids.clone(),
        })
    }

    /// Split into (train, validation, test) using [`split_indices`].
    pub fn split(&self, valid_size: f64, test_size: f64, seed: u64) -> Result<(Self, Self, Self)> {
        let split = split_indices(self.len(), valid_size, test_size, seed)?;
        Ok((
            self.select_rows(&split.train)?,
            self.select_rows(&split.valid)?,
            self.select_rows(&split.test)?,
        ))
    }

    pub fn log_summary(&self, name: &str) {
        let positives = self.positive_count();
        let share = if self.is_empty() {
            0.0
        } else {
            positives as f64 / self.len() as f64
        };
        log::info!(
            "{}: {} rows, {} features, {} frauds ({:.4}%)",
            name,
            self.len(),
            self.n_features(),
            positives,
            share * 100.0
        );
    }
}

/// Check the evaluator/trainer input contract: equal lengths, labels in {0, 1}.
pub fn check_xy(x: &Array2<f64>, y: &Array1<i32>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(LifecycleError::InvalidInput(format!(
            "feature rows ({}) and labels ({}) differ in length",
            x.nrows(),
            y.len()
        )));
    }
    check_binary(y)
}

pub fn check_binary(y: &Array1<i32>) -> Result<()> {
    if let Some(bad) = y.iter().find(|&&v| v != 0 && v != 1) {
        return Err(LifecycleError::InvalidInput(format!(
            "target must be binary (0/1), found {}",
            bad
        )));
    }
    Ok(())
}

/// Disjoint row-index partitions of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with a seeded RNG and cut it into train/validation/test.
///
/// `valid_size` and `test_size` are fractions of `n`; the remainder is the
/// training split, which must not end up empty.
pub fn split_indices(n: usize, valid_size: f64, test_size: f64, seed: u64) -> Result<SplitIndices> {
    let in_range = |v: f64| (0.0..1.0).contains(&v);
    if !in_range(valid_size) || !in_range(test_size) || valid_size + test_size >= 1.0 {
        return Err(LifecycleError::Configuration(format!(
            "invalid split sizes: valid {} test {}",
            valid_size, test_size
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = (n as f64 * test_size).round() as usize;
    let n_valid = (n as f64 * valid_size).round() as usize;
    if n_test + n_valid >= n {
        return Err(LifecycleError::InvalidInput(format!(
            "{} rows are too few for the requested split",
            n
        )));
    }

    let test = indices[..n_test].to_vec();
    let valid = indices[n_test..n_test + n_valid].to_vec();
    let train = indices[n_test + n_valid..].to_vec();
    Ok(SplitIndices { train, valid, test })
}

/// Configuration for reading delimited transaction files.
#[derive(Debug, Clone)]
pub struct DatasetReaderConfig {
    pub target_column: String,
    /// Row identifier, excluded from the features when present.
    pub id_column: Option<String>,
    pub delimiter: u8,
    /// Extra columns to leave out of the features.
    pub ignore_columns: Vec<String>,
}

impl Default for DatasetReaderConfig {
    fn default() -> Self {
        Self {
            target_column: "is_fraud".to_string(),
            id_column: Some("transaction_id".to_string()),
            delimiter: b',',
            ignore_columns: Vec::new(),
        }
    }
}

impl DatasetReaderConfig {
    pub fn from_pipeline(config: &crate::config::PipelineConfig) -> Self {
        Self {
            target_column: config.target_column.clone(),
            id_column: config.id_column.clone(),
            ..Default::default()
        }
    }
}

/// Read a delimited file with a header row into a [`Dataset`].
pub fn read_dataset_csv<P: AsRef<Path>>(path: P, config: &DatasetReaderConfig) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(true)
        .from_path(&path)?;

    let headers = reader.headers()?.clone();
    let target_idx = find_column(&headers, &config.target_column).ok_or_else(|| {
        LifecycleError::InvalidInput(format!(
            "missing target column '{}' in {}",
            config.target_column,
            path.as_ref().display()
        ))
    })?;
    let id_idx = config
        .id_column
        .as_deref()
        .and_then(|name| find_column(&headers, name));

    let feature_indices: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(idx, name)| {
            *idx != target_idx
                && Some(*idx) != id_idx
                && !config.ignore_columns.iter().any(|c| c == name.trim())
        })
        .map(|(idx, _)| idx)
        .collect();
    if feature_indices.is_empty() {
        return Err(LifecycleError::InvalidInput(format!(
            "no feature columns in {}",
            path.as_ref().display()
        )));
    }
    let feature_names: Vec<String> = feature_indices
        .iter()
        .map(|&i| headers.get(i).unwrap_or_default().trim().to_string())
        .collect();

    let mut features = Vec::new();
    let mut labels = Vec::new();
    let mut ids = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let line = row_idx + 2;

        let raw_label = record.get(target_idx).unwrap_or_default().trim();
        labels.push(parse_label(raw_label).ok_or_else(|| {
            LifecycleError::InvalidInput(format!("invalid label '{}' at line {}", raw_label, line))
        })?);

        if let Some(idx) = id_idx {
            ids.push(record.get(idx).unwrap_or_default().trim().to_string());
        }

        push_features(&record, &headers, &feature_indices, line, &mut features)?;
    }

    let n_rows = labels.len();
    let x = Array2::from_shape_vec((n_rows, feature_indices.len()), features)
        .map_err(|e| LifecycleError::InvalidInput(e.to_string()))?;
    let dataset = Dataset::new(x, Array1::from(labels), feature_names)?;
    let dataset = if id_idx.is_some() {
        dataset.with_ids(ids)?
    } else {
        dataset
    };

    log::debug!(
        "Read {} rows x {} features from {}",
        dataset.len(),
        dataset.n_features(),
        path.as_ref().display()
    );
    Ok(dataset)
}

/// Feature rows of a file without labels, plus the raw records they came from.
#[derive(Debug, Clone)]
pub struct UnlabelledTable {
    pub x: Array2<f64>,
    pub feature_names: Vec<String>,
    /// Header of the file, every column included.
    pub headers: StringRecord,
    pub records: Vec<StringRecord>,
}

impl UnlabelledTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read a delimited file that may lack the target column.
///
/// With `columns` empty every column except the id, the target (when
/// present) and `ignore_columns` is a feature, in file order. Otherwise
/// exactly `columns` are read, in that order, and a missing one is an error.
pub fn read_unlabelled_csv<P: AsRef<Path>>(
    path: P,
    config: &DatasetReaderConfig,
    columns: &[String],
) -> Result<UnlabelledTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(true)
        .from_path(&path)?;
    let headers = reader.headers()?.clone();

    let feature_indices: Vec<usize> = if columns.is_empty() {
        let target_idx = find_column(&headers, &config.target_column);
        let id_idx = config
            .id_column
            .as_deref()
            .and_then(|name| find_column(&headers, name));
        headers
            .iter()
            .enumerate()
            .filter(|(idx, name)| {
                Some(*idx) != target_idx
                    && Some(*idx) != id_idx
                    && !config.ignore_columns.iter().any(|c| c == name.trim())
            })
            .map(|(idx, _)| idx)
            .collect()
    } else {
        columns
            .iter()
            .map(|name| {
                find_column(&headers, name).ok_or_else(|| {
                    LifecycleError::InvalidInput(format!(
                        "missing feature column '{}' in {}",
                        name,
                        path.as_ref().display()
                    ))
                })
            })
            .collect::<Result<_>>()?
    };
    if feature_indices.is_empty() {
        return Err(LifecycleError::InvalidInput(format!(
            "no feature columns in {}",
            path.as_ref().display()
        )));
    }
    let feature_names: Vec<String> = feature_indices
        .iter()
        .map(|&i| headers.get(i).unwrap_or_default().trim().to_string())
        .collect();

    let mut features = Vec::new();
    let mut records = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        push_features(&record, &headers, &feature_indices, row_idx + 2, &mut features)?;
        records.push(record);
    }

    let x = Array2::from_shape_vec((records.len(), feature_indices.len()), features)
        .map_err(|e| LifecycleError::InvalidInput(e.to_string()))?;
    log::debug!(
        "Read {} unlabelled rows x {} features from {}",
        records.len(),
        feature_names.len(),
        path.as_ref().display()
    );
    Ok(UnlabelledTable {
        x,
        feature_names,
        headers,
        records,
    })
}

fn push_features(
    record: &StringRecord,
    headers: &StringRecord,
    feature_indices: &[usize],
    line: usize,
    features: &mut Vec<f64>,
) -> Result<()> {
    for &idx in feature_indices {
        let value = record.get(idx).unwrap_or_default().trim();
        let parsed = value.parse::<f64>().map_err(|_| {
            LifecycleError::InvalidInput(format!(
                "invalid value '{}' for feature '{}' at line {}",
                value,
                headers.get(idx).unwrap_or(""),
                line
            ))
        })?;
        features.push(parsed);
    }
    Ok(())
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

fn parse_label(raw: &str) -> Option<i32> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" => Some(1),
        "0" | "0.0" | "false" => Some(0),
        _ => None,
    }
}
