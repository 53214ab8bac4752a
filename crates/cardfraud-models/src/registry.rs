//! Model registry: versioned artifacts addressed by lifecycle aliases.
//!
//! The decision engine talks to the registry through [`ModelRegistry`];
//! [`LocalRegistry`] keeps everything on the local filesystem:
//!
//! ```text
//! <root>/<model_id>/registry.json          version index and aliases
//! <root>/<model_id>/versions/<n>/model.json pipeline artifact
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

pub const CHAMPION_ALIAS: &str = "champion";
pub const CHALLENGER_ALIAS: &str = "challenger";
pub const DEFAULT_ALIAS: &str = "default";

const ARTIFACT_FILE: &str = "model.json";

/// One registered version of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_id: String,
    pub version: u32,
    pub display_name: String,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ModelVersion {
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }
}

/// Everything needed to register a new version.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub model_id: String,
    pub display_name: String,
    pub artifact: PathBuf,
    pub description: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub aliases: Vec<String>,
    /// Move the "default" alias onto the new version.
    pub is_default_version: bool,
    pub pipeline_timestamp: Option<String>,
    pub data_version: Option<String>,
    /// Candidate name; adds a `model_name` label and a per-run alias.
    pub model_name: Option<String>,
}

impl UploadRequest {
    pub fn new(model_id: &str, artifact: impl Into<PathBuf>) -> Self {
        Self {
            model_id: model_id.to_string(),
            display_name: model_id.to_string(),
            artifact: artifact.into(),
            description: None,
            labels: BTreeMap::new(),
            aliases: Vec::new(),
            is_default_version: false,
            pipeline_timestamp: None,
            data_version: None,
            model_name: None,
        }
    }

    /// Final labels and aliases, with the run metadata folded in.
    pub fn resolved_labels_and_aliases(&self) -> (BTreeMap<String, String>, Vec<String>) {
        let mut labels = self.labels.clone();
        let mut aliases = self.aliases.clone();
        if let Some(data_version) = &self.data_version {
            labels.insert("data_version".to_string(), data_version.replace('T', ""));
        }
        if let Some(timestamp) = &self.pipeline_timestamp {
            labels.insert("pipeline_timestamp".to_string(), timestamp.replace('T', ""));
        }
        if let Some(model_name) = &self.model_name {
            let timestamp = labels
                .get("pipeline_timestamp")
                .map(String::as_str)
                .unwrap_or("no-timestamp");
            aliases.push(format!("{}-{}", model_name.replace('_', "-"), timestamp));
            labels.insert("model_name".to_string(), model_name.clone());
        }
        if self.is_default_version {
            aliases.push(DEFAULT_ALIAS.to_string());
        }
        (labels, aliases)
    }
}

/// Lowercase, map `_` to `-` and drop everything outside `[0-9a-z-]`.
pub fn normalize_alias(alias: &str) -> String {
    alias
        .to_lowercase()
        .replace('_', "-")
        .chars()
        .filter(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || *c == '-')
        .collect()
}

pub trait ModelRegistry: Send + Sync {
    /// Register a new version of `request.model_id`, creating the model if needed.
    fn upload(&self, request: &UploadRequest) -> Result<ModelVersion>;

    /// Find the version carrying `alias`. Not-found is `Ok(None)`.
    fn lookup(&self, model_id: &str, alias: &str) -> Result<Option<ModelVersion>>;

    /// Merge aliases into a version. An alias moves from whichever version
    /// held it; a leading `-` removes the alias instead.
    fn merge_version_aliases(
        &self,
        model_id: &str,
        version: u32,
        aliases: &[String],
    ) -> Result<ModelVersion>;

    /// Copy a version's artifact into `dest_dir` and return the file path.
    fn export_model(&self, version: &ModelVersion, dest_dir: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    model_id: String,
    versions: Vec<ModelVersion>,
}

impl RegistryIndex {
    fn apply_aliases(&mut self, version: u32, aliases: &[String]) -> Result<()> {
        if !self.versions.iter().any(|v| v.version == version) {
            return Err(LifecycleError::Registry(format!(
                "model {} has no version {}",
                self.model_id, version
            )));
        }
        for raw in aliases {
            let alias = normalize_alias(raw);
            if let Some(removed) = alias.strip_prefix('-') {
                if let Some(v) = self.versions.iter_mut().find(|v| v.version == version) {
                    v.aliases.retain(|a| a != removed);
                }
                continue;
            }
            if alias.is_empty() {
                continue;
            }
            for v in self.versions.iter_mut() {
                if v.version == version {
                    if !v.has_alias(&alias) {
                        v.aliases.push(alias.clone());
                    }
                } else {
                    v.aliases.retain(|a| *a != alias);
                }
            }
        }
        Ok(())
    }
}

/// Filesystem-backed registry.
#[derive(Debug)]
pub struct LocalRegistry {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalRegistry {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, model_id: &str) -> PathBuf {
        self.root.join(model_id)
    }

    fn index_path(&self, model_id: &str) -> PathBuf {
        self.model_dir(model_id).join("registry.json")
    }

    fn read_index(&self, model_id: &str) -> Result<Option<RegistryIndex>> {
        let path = self.index_path(model_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_index(&self, index: &RegistryIndex) -> Result<()> {
        let path = self.index_path(&index.model_id);
        fs::create_dir_all(self.model_dir(&index.model_id))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(index)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| LifecycleError::Registry("registry lock poisoned".to_string()))
    }

    /// All versions of a model, oldest first.
    pub fn list_versions(&self, model_id: &str) -> Result<Vec<ModelVersion>> {
        Ok(self
            .read_index(model_id)?
            .map(|index| index.versions)
            .unwrap_or_default())
    }
}

impl ModelRegistry for LocalRegistry {
    fn upload(&self, request: &UploadRequest) -> Result<ModelVersion> {
        let _guard = self.guard()?;
        if !request.artifact.is_file() {
            return Err(LifecycleError::Registry(format!(
                "artifact {} does not exist",
                request.artifact.display()
            )));
        }

        let mut index = match self.read_index(&request.model_id)? {
            Some(index) => index,
            None => {
                log::info!("Parent model {} not found, creating it", request.model_id);
                RegistryIndex {
                    model_id: request.model_id.clone(),
                    versions: Vec::new(),
                }
            }
        };
        let version = index.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        let version_dir = self
            .model_dir(&request.model_id)
            .join("versions")
            .join(version.to_string());
        fs::create_dir_all(&version_dir)?;
        let artifact_path = version_dir.join(ARTIFACT_FILE);
        fs::copy(&request.artifact, &artifact_path)?;

        let (labels, aliases) = request.resolved_labels_and_aliases();
        log::debug!("Version aliases: {:?}", aliases);
        log::debug!("Labels: {:?}", labels);

        index.versions.push(ModelVersion {
            model_id: request.model_id.clone(),
            version,
            display_name: request.display_name.clone(),
            description: request.description.clone(),
            aliases: Vec::new(),
            labels,
            artifact_path,
            created_at: Utc::now(),
        });
        index.apply_aliases(version, &aliases)?;
        self.write_index(&index)?;

        let uploaded = index
            .versions
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| LifecycleError::Registry("uploaded version vanished".to_string()))?;
        log::info!(
            "Uploaded model {} version {} with aliases {:?}",
            uploaded.model_id,
            uploaded.version,
            uploaded.aliases
        );
        Ok(uploaded)
    }

    fn lookup(&self, model_id: &str, alias: &str) -> Result<Option<ModelVersion>> {
        let alias = normalize_alias(alias);
        let found = self
            .read_index(model_id)?
            .and_then(|index| index.versions.into_iter().find(|v| v.has_alias(&alias)));
        match &found {
            Some(v) => log::info!(
                "Model {} alias {} resolves to version {}",
                model_id,
                alias,
                v.version
            ),
            None => log::warn!("No model found with name {} and alias {}", model_id, alias),
        }
        Ok(found)
    }

    fn merge_version_aliases(
        &self,
        model_id: &str,
        version: u32,
        aliases: &[String],
    ) -> Result<ModelVersion> {
        let _guard = self.guard()?;
        let mut index = self.read_index(model_id)?.ok_or_else(|| {
            LifecycleError::Registry(format!("no model found with name {}", model_id))
        })?;
        index.apply_aliases(version, aliases)?;
        self.write_index(&index)?;
        index
            .versions
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| {
                LifecycleError::Registry(format!("model {} has no version {}", model_id, version))
            })
    }

    fn export_model(&self, version: &ModelVersion, dest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(ARTIFACT_FILE);
        fs::copy(&version.artifact_path, &dest)?;
        log::info!(
            "Exported {} version {} to {}",
            version.model_id,
            version.version,
            dest.display()
        );
        Ok(dest)
    }
}
