//! CLI command definitions

use crate::core::{StageId, StartAt};
use clap::Args;
use std::path::PathBuf;

/// Run the pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to the pipeline configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Parameter overrides (key=value), persisted with the configuration
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,

    /// Stage to start from, reusing committed outputs of earlier stages
    #[arg(long, value_parser = parse_stage, conflicts_with = "resume")]
    pub from_stage: Option<StageId>,

    /// Continue after the last completed stage
    #[arg(long)]
    pub resume: bool,

    /// Only print the final result
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunCommand {
    pub fn start(&self) -> StartAt {
        match (self.from_stage, self.resume) {
            (Some(stage), _) => StartAt::Stage(stage),
            (None, true) => StartAt::Resume,
            (None, false) => StartAt::Beginning,
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the pipeline configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Output in JSON format, failures included
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].trim().is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].trim().to_string(), parts[1].to_string()))
}

/// Parse a stage identifier
pub fn parse_stage(s: &str) -> Result<StageId, String> {
    s.parse::<StageId>().map_err(|_| {
        let known: Vec<&str> = StageId::ALL.iter().map(|id| id.as_str()).collect();
        format!("unknown stage '{}' (expected one of: {})", s, known.join(", "))
    })
}
