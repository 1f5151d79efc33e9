//! Pipeline domain model
//!
//! A [`Pipeline`] is the ordered list of stages selected by the
//! configuration. It answers where a run starts, which derived keys a run
//! will overwrite and whether every stage can resolve its inputs.

use crate::core::{
    catalog::stage_spec,
    config::PipelineConfig,
    error::PipelineError,
    stage::{StageId, StageSpec, LAST_COMPLETED_KEY},
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Which stages a run includes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineVariant {
    /// Split, index and align only
    Core,
    /// Core plus clustering, poly(A) estimation and the per-run QC report
    #[default]
    Standard,
    /// Every stage in the catalog
    Full,
}

impl PipelineVariant {
    pub const KEY: &'static str = "pipeline_variant";

    pub fn stages(self) -> Vec<StageId> {
        use StageId::*;
        match self {
            PipelineVariant::Core => vec![SplitFast5, IndexReads, Align],
            PipelineVariant::Standard => vec![SplitFast5, IndexReads, Align, Cluster, Polya, Pycoqc],
            PipelineVariant::Full => StageId::ALL.to_vec(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineVariant::Core => "core",
            PipelineVariant::Standard => "standard",
            PipelineVariant::Full => "full",
        }
    }
}

impl FromStr for PipelineVariant {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(PipelineVariant::Core),
            "standard" => Ok(PipelineVariant::Standard),
            "full" => Ok(PipelineVariant::Full),
            _ => Err(PipelineError::InvalidParameter {
                key: Self::KEY.to_string(),
                value: s.to_string(),
                reason: "expected one of: core, standard, full".to_string(),
            }),
        }
    }
}

/// Toolchain used for signal-level stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventBackend {
    #[default]
    Nanopolish,
    F5c,
}

impl EventBackend {
    pub const KEY: &'static str = "event_backend";

    pub fn as_str(self) -> &'static str {
        match self {
            EventBackend::Nanopolish => "nanopolish",
            EventBackend::F5c => "f5c",
        }
    }
}

impl FromStr for EventBackend {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nanopolish" => Ok(EventBackend::Nanopolish),
            "f5c" => Ok(EventBackend::F5c),
            _ => Err(PipelineError::InvalidParameter {
                key: Self::KEY.to_string(),
                value: s.to_string(),
                reason: "expected one of: nanopolish, f5c".to_string(),
            }),
        }
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EventBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartAt {
    #[default]
    Beginning,
    /// Begin at a named stage, reusing committed keys of earlier stages
    Stage(StageId),
    /// Continue after the stage recorded in `last_completed_stage`
    Resume,
}

/// The ordered stages of one run
#[derive(Debug, Clone)]
pub struct Pipeline {
    variant: PipelineVariant,
    backend: EventBackend,
    stages: Vec<StageSpec>,
}

impl Pipeline {
    pub fn new(variant: PipelineVariant, backend: EventBackend) -> Self {
        let stages = variant
            .stages()
            .into_iter()
            .map(|id| stage_spec(id, backend))
            .collect();

        Self {
            variant,
            backend,
            stages,
        }
    }

    /// Select variant and backend from the configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let variant = match config.get_str(PipelineVariant::KEY) {
            Some(value) => value.parse()?,
            None => PipelineVariant::default(),
        };
        let backend = match config.get_str(EventBackend::KEY) {
            Some(value) => value.parse()?,
            None => EventBackend::default(),
        };
        Ok(Self::new(variant, backend))
    }

    pub fn variant(&self) -> PipelineVariant {
        self.variant
    }

    pub fn backend(&self) -> EventBackend {
        self.backend
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn position(&self, id: StageId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.id == id)
    }

    /// Index of the first stage to execute
    ///
    /// Returns `stages().len()` when a resumed run has nothing left to do.
    pub fn start_index(&self, config: &PipelineConfig, start: StartAt) -> Result<usize, PipelineError> {
        match start {
            StartAt::Beginning => Ok(0),
            StartAt::Stage(id) => self.position(id).ok_or_else(|| PipelineError::InvalidParameter {
                key: "from_stage".to_string(),
                value: id.to_string(),
                reason: format!("stage is not part of the '{}' pipeline", self.variant),
            }),
            StartAt::Resume => {
                let last = match config.get_str(LAST_COMPLETED_KEY) {
                    Some(last) => last.parse::<StageId>()?,
                    None => return Ok(0),
                };
                // The variant may have changed since the last run, so compare
                // by catalog order instead of plan position
                Ok(self
                    .stages
                    .iter()
                    .position(|stage| stage.id > last)
                    .unwrap_or(self.stages.len()))
            }
        }
    }

    /// Derived keys that the stages from `start` on will write
    pub fn produced_keys(&self, start: usize) -> Vec<&'static str> {
        self.stages
            .iter()
            .skip(start)
            .flat_map(|stage| stage.produces.iter().copied())
            .collect()
    }

    /// Check that every stage from `start` can resolve its required keys
    ///
    /// A key is available when it is configured or produced by an earlier
    /// stage of this run. Nothing is executed.
    pub fn check_inputs(&self, start: usize, config: &PipelineConfig) -> Result<(), PipelineError> {
        let mut produced: HashSet<&str> = HashSet::new();

        for stage in self.stages.iter().skip(start) {
            for key in &stage.required {
                let configured = config
                    .get_str(key)
                    .is_some_and(|value| !value.trim().is_empty());
                if !configured && !produced.contains(key) {
                    return Err(PipelineError::missing(stage.id.as_str(), *key));
                }
            }
            produced.extend(stage.produces.iter().copied());
        }

        Ok(())
    }

    /// Serializable view of the plan
    pub fn summary(&self, start: usize) -> PlanSummary {
        PlanSummary {
            variant: self.variant,
            backend: self.backend,
            stages: self
                .stages
                .iter()
                .enumerate()
                .map(|(i, stage)| StageSummary {
                    id: stage.id,
                    description: stage.description,
                    output_dir: stage.output_dir.dir_name(),
                    required: stage.required.clone(),
                    produces: stage.produces.clone(),
                    skipped: i < start,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub variant: PipelineVariant,
    pub backend: EventBackend,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub id: StageId,
    pub description: &'static str,
    pub output_dir: &'static str,
    pub required: Vec<&'static str>,
    pub produces: Vec<&'static str>,
    pub skipped: bool,
}
