//! Stage domain model

use crate::core::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::core::layout::{RunDir, RunLayout};
use crate::execution::runner::Invocation;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Identifier of a pipeline stage
///
/// Variants are declared in execution order, so `Ord` follows the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    SplitFast5,
    IndexReads,
    Align,
    Cluster,
    Polya,
    Eventalign,
    Pycoqc,
    Multiqc,
}

impl StageId {
    pub const ALL: [StageId; 8] = [
        StageId::SplitFast5,
        StageId::IndexReads,
        StageId::Align,
        StageId::Cluster,
        StageId::Polya,
        StageId::Eventalign,
        StageId::Pycoqc,
        StageId::Multiqc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::SplitFast5 => "split_fast5",
            StageId::IndexReads => "index_reads",
            StageId::Align => "align",
            StageId::Cluster => "cluster",
            StageId::Polya => "polya",
            StageId::Eventalign => "eventalign",
            StageId::Pycoqc => "pycoqc",
            StageId::Multiqc => "multiqc",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .into_iter()
            .find(|id| id.as_str() == s.trim())
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}

/// Builds the invocations of one stage from resolved inputs
pub type PlanBuilder = fn(&StageInputs<'_>) -> Result<StagePlan, PipelineError>;

/// Static description of a stage
#[derive(Clone)]
pub struct StageSpec {
    pub id: StageId,
    pub description: &'static str,
    /// Subdirectory of the run root receiving this stage's outputs
    pub output_dir: RunDir,
    /// Keys that must be configured or produced by an earlier stage
    pub required: Vec<&'static str>,
    /// Keys read when present
    pub optional: Vec<&'static str>,
    /// Keys committed to the configuration on success
    pub produces: Vec<&'static str>,
    pub(crate) builder: PlanBuilder,
}

impl StageSpec {
    /// Resolve inputs and build the stage's invocations
    pub fn plan(&self, config: &PipelineConfig, layout: &RunLayout) -> Result<StagePlan, PipelineError> {
        let inputs = StageInputs::new(self.id, config, layout);
        (self.builder)(&inputs)
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
            .field("id", &self.id)
            .field("output_dir", &self.output_dir)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("produces", &self.produces)
            .finish()
    }
}

/// Invocations and committed values of one stage execution
#[derive(Debug, Clone, Default)]
pub struct StagePlan {
    /// Run strictly in order; the first failure stops the stage
    pub invocations: Vec<Invocation>,
    /// Key/value pairs to commit after every invocation succeeded
    pub produces: Vec<(String, String)>,
    /// Files or directories the tools are expected to leave behind
    pub expected_outputs: Vec<PathBuf>,
}

impl StagePlan {
    pub fn invoke(mut self, invocation: Invocation) -> Self {
        self.invocations.push(invocation);
        self
    }

    pub fn produce(mut self, key: &str, value: impl AsRef<Path>) -> Self {
        let value = value.as_ref();
        self.produces.push((key.to_string(), value.display().to_string()));
        self.expected_outputs.push(value.to_path_buf());
        self
    }
}

/// Configuration view handed to a stage builder
pub struct StageInputs<'a> {
    stage: StageId,
    config: &'a PipelineConfig,
    layout: &'a RunLayout,
}

impl<'a> StageInputs<'a> {
    pub fn new(stage: StageId, config: &'a PipelineConfig, layout: &'a RunLayout) -> Self {
        Self {
            stage,
            config,
            layout,
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Value of a required key
    pub fn require(&self, key: &str) -> Result<String, PipelineError> {
        self.config
            .get_str(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| PipelineError::missing(self.stage.as_str(), key))
    }

    pub fn optional(&self, key: &str) -> Option<String> {
        self.config
            .get_str(key)
            .filter(|value| !value.trim().is_empty())
    }

    /// Tool path with a fallback program name looked up on `PATH`
    pub fn tool_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.config.get_list(key).unwrap_or_default()
    }

    /// Positive worker count from `threads`
    pub fn threads(&self) -> Result<u32, PipelineError> {
        let raw = self.require(THREADS_KEY)?;
        parse_threads(&raw)
    }

    pub fn output_dir(&self, dir: RunDir) -> PathBuf {
        self.layout.dir(dir)
    }

    /// Environment for tools that read raw signal files
    pub fn signal_env(&self) -> Vec<(String, String)> {
        self.optional("hdf5_plugin_path")
            .map(|path| vec![("HDF5_PLUGIN_PATH".to_string(), path)])
            .unwrap_or_default()
    }
}

pub const THREADS_KEY: &str = "threads";
pub const LAST_COMPLETED_KEY: &str = "last_completed_stage";

/// Parse a `threads` value, rejecting zero and non-integers
pub fn parse_threads(raw: &str) -> Result<u32, PipelineError> {
    let invalid = |reason: &str| PipelineError::InvalidParameter {
        key: THREADS_KEY.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    match raw.trim().parse::<u32>() {
        Ok(0) => Err(invalid("must be at least 1")),
        Ok(threads) => Ok(threads),
        Err(_) => Err(invalid("expected a positive integer")),
    }
}

/// File name of the coordinate-sorted alignment for a reads file
///
/// `reads.fastq.gz` and `reads.fastq` both map to `reads.sorted.bam`.
pub fn sorted_bam_name(fastq: &Path) -> String {
    let name = fastq
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reads".to_string());

    let mut stem = name.as_str();
    for ext in [".gz", ".fastq", ".fq"] {
        if let Some(stripped) = stem.strip_suffix(ext) {
            stem = stripped;
        }
    }
    if stem.is_empty() {
        stem = "reads";
    }

    format!("{}.sorted.bam", stem)
}
