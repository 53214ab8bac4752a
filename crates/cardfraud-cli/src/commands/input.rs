use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};

use cardfraud_models::config::PipelineConfig;

/// Pipeline configuration plus the data files of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
    pub train_data: Option<PathBuf>,
    pub validation_data: Option<PathBuf>,
    pub test_data: Option<PathBuf>,
}

impl RunConfig {
    /// Load `config_path` and apply the data overrides given on the command line.
    pub fn from_arguments(config_path: &Path, matches: &ArgMatches) -> Result<Self> {
        let mut config = load_run_config(config_path)?;

        if let Some(train_data) = path_arg(matches, "train_data") {
            config.train_data = Some(train_data);
        }
        if let Some(validation_data) = path_arg(matches, "validation_data") {
            config.validation_data = Some(validation_data);
        }
        if let Some(test_data) = path_arg(matches, "test_data") {
            config.test_data = Some(test_data);
        }

        for path in [&config.train_data, &config.validation_data, &config.test_data]
            .into_iter()
            .flatten()
        {
            validate_csv_file(path)?;
        }
        config
            .pipeline
            .validate()
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;
        Ok(config)
    }

    pub fn train_data(&self) -> Result<&Path> {
        self.train_data
            .as_deref()
            .context("No training data given; pass --train_data or set train_data in the config")
    }
}

/// Value of an optional path argument; `None` when the subcommand lacks it.
fn path_arg(matches: &ArgMatches, id: &str) -> Option<PathBuf> {
    matches.try_get_one::<PathBuf>(id).ok().flatten().cloned()
}

pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: RunConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(config)
}

pub fn validate_csv_file(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    match ext.as_deref() {
        Some("csv") => {}
        _ => anyhow::bail!("File must have a .csv extension: {}", path.display()),
    }
    if !path.exists() {
        anyhow::bail!("File does not exist: {}", path.display());
    }
    Ok(())
}
