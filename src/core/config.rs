//! Pipeline configuration persisted as YAML
//!
//! The configuration file is the single source of truth shared by every
//! stage: fixed inputs are read from it and derived artifact paths are
//! committed back into it after each successful stage.

use crate::core::error::PipelineError;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Key/value parameters for one pipeline
///
/// Backed by an insertion-ordered mapping so that a load/save round trip
/// leaves unrelated keys untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    entries: Mapping,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document parses as null rather than an empty mapping
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_yaml::from_str(yaml)
    }

    /// Render the configuration as a YAML document
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Get the raw value of a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).filter(|v| !v.is_null())
    }

    /// Check whether a key holds a non-null value
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Get a scalar value rendered as a string
    ///
    /// Numbers and booleans are rendered in their YAML form; `null`,
    /// sequences and mappings are treated as unset.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Tagged(tagged) => scalar_to_string(&tagged.value),
            _ => None,
        }
    }

    /// Get a path-valued key
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    /// Get a list-valued key
    ///
    /// Accepts either a YAML sequence or a comma-separated string.
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = match self.get(key)? {
            Value::Sequence(seq) => seq.iter().filter_map(scalar_to_string).collect(),
            other => scalar_to_string(other)?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        };
        let items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
        if items.is_empty() {
            None
        } else {
            Some(items)
        }
    }

    /// Set a key, replacing any previous value in place
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(Value::String(key.into()), value.into());
    }

    /// Remove a key, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// All keys in document order
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a `key=value` override
    ///
    /// The value is parsed as a YAML scalar so `threads=8` stores an integer.
    pub fn apply_override(&mut self, key: &str, raw: &str) {
        let value = serde_yaml::from_str::<Value>(raw)
            .ok()
            .filter(|v| !matches!(v, Value::Mapping(_) | Value::Tagged(_)))
            .unwrap_or_else(|| Value::String(raw.to_string()));
        self.set(key, value);
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Loads and persists a [`PipelineConfig`] at a fixed path
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration file
    pub fn load(&self) -> Result<PipelineConfig, PipelineError> {
        let content = fs::read_to_string(&self.path).map_err(|e| PipelineError::ConfigRead {
            path: self.path.clone(),
            source: Box::new(e),
        })?;

        let value: Value = if content.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(&content).map_err(|e| PipelineError::ConfigRead {
                path: self.path.clone(),
                source: Box::new(e),
            })?
        };

        match value {
            Value::Mapping(entries) => {
                debug!("Loaded {} configuration keys from {}", entries.len(), self.path.display());
                Ok(PipelineConfig { entries })
            }
            other => Err(PipelineError::ConfigRead {
                path: self.path.clone(),
                source: format!("expected a key/value mapping, found {}", value_kind(&other)).into(),
            }),
        }
    }

    /// Persist the configuration
    ///
    /// The document is written to a temporary file in the same directory and
    /// renamed over the target, so a crash mid-write leaves the previous file
    /// intact.
    pub fn save(&self, config: &PipelineConfig) -> Result<(), PipelineError> {
        let write_err = |source: std::io::Error| PipelineError::ConfigWrite {
            path: self.path.clone(),
            source,
        };

        let yaml = config
            .to_yaml()
            .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let tmp_path = self.temp_path();
        let result = (|| {
            let mut file = File::create(&tmp_path)?;
            file.write_all(yaml.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(e) = result {
            fs::remove_file(&tmp_path).ok();
            return Err(write_err(e));
        }

        debug!("Saved {} configuration keys to {}", config.len(), self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let tmp_name = format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple());
        match self.path.parent() {
            Some(parent) => parent.join(tmp_name),
            None => PathBuf::from(tmp_name),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
