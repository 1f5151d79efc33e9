//! Timestamped run directory layout

use crate::core::error::PipelineError;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

/// Timestamp format used for run roots and log files
///
/// Fixed width, most significant field first, so lexical order matches
/// chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Named subdirectories owned by every run root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDir {
    /// Single-read FAST5 files
    SplitFast5,
    Index,
    Alignment,
    Cluster,
    Polya,
    Eventalign,
    /// Per-run and aggregated QC reports
    Qc,
    Logs,
}

impl RunDir {
    pub const ALL: [RunDir; 8] = [
        RunDir::SplitFast5,
        RunDir::Index,
        RunDir::Alignment,
        RunDir::Cluster,
        RunDir::Polya,
        RunDir::Eventalign,
        RunDir::Qc,
        RunDir::Logs,
    ];

    /// Directory name, stable across runs
    pub fn dir_name(self) -> &'static str {
        match self {
            RunDir::SplitFast5 => "fast5s",
            RunDir::Index => "index",
            RunDir::Alignment => "alignment",
            RunDir::Cluster => "cluster",
            RunDir::Polya => "polya",
            RunDir::Eventalign => "eventalign",
            RunDir::Qc => "qc",
            RunDir::Logs => "logs",
        }
    }
}

impl fmt::Display for RunDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Directories of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    /// Root directory of the run
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named subdirectory
    pub fn dir(&self, dir: RunDir) -> PathBuf {
        self.root.join(dir.dir_name())
    }

    pub fn logs(&self) -> PathBuf {
        self.dir(RunDir::Logs)
    }
}

/// Name of the run root for a given instant
pub fn run_dir_name(timestamp: DateTime<Local>) -> String {
    format!("{}_output", timestamp.format(TIMESTAMP_FORMAT))
}

/// Creates the run layout once per process
///
/// The first successful [`OutputLayout::create`] call fixes the run root;
/// later calls return the same layout without touching the filesystem.
#[derive(Debug)]
pub struct OutputLayout {
    base: PathBuf,
    created: OnceLock<RunLayout>,
}

impl OutputLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            created: OnceLock::new(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create the run root and all its subdirectories
    pub fn create(&self) -> Result<RunLayout, PipelineError> {
        if let Some(layout) = self.created.get() {
            return Ok(layout.clone());
        }

        let layout = Self::create_at(&self.base, Local::now())?;
        Ok(self.created.get_or_init(|| layout).clone())
    }

    fn create_at(base: &Path, timestamp: DateTime<Local>) -> Result<RunLayout, PipelineError> {
        let dir_err = |path: &Path, source| PipelineError::DirectoryCreation {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(base).map_err(|e| dir_err(base, e))?;

        // The root itself must be new so two runs never share it
        let root = base.join(run_dir_name(timestamp));
        fs::create_dir(&root).map_err(|e| dir_err(&root, e))?;

        let layout = RunLayout { root };
        for dir in RunDir::ALL {
            let path = layout.dir(dir);
            fs::create_dir_all(&path).map_err(|e| dir_err(&path, e))?;
        }

        info!("Created run directory: {}", layout.root.display());
        Ok(layout)
    }
}
