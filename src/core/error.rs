//! Error taxonomy shared by every pipeline component

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading configuration, preparing a run or executing stages
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration file missing, unreadable or not a key/value document
    #[error("Failed to read configuration {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration could not be persisted
    #[error("Failed to write configuration {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stage needs a key that is not set and no earlier stage produces it
    #[error("Stage '{stage}' requires parameter '{key}' which is not set")]
    MissingParameter { stage: String, key: String },

    /// A key is set but its value cannot be used
    #[error("Parameter '{key}' has invalid value '{value}': {reason}")]
    InvalidParameter {
        key: String,
        value: String,
        reason: String,
    },

    /// Run layout construction failed
    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully
    #[error("Stage '{stage}' failed: {program} exited with {}", format_exit_code(.exit_code))]
    StageFailure {
        stage: String,
        program: String,
        exit_code: Option<i32>,
        diagnostic: String,
    },

    /// An external tool could not be started
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The file receiving a tool's standard output could not be opened
    #[error("Failed to open output file {path}: {source}")]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    /// The run log file could not be created
    #[error("Failed to initialise run log {path}: {source}")]
    LogInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Process exit code for this failure
    ///
    /// A stage failure propagates the tool's own exit code when it fits in a
    /// process exit status; everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::StageFailure {
                exit_code: Some(code),
                ..
            } if (1..=255).contains(code) => *code,
            _ => 1,
        }
    }

    pub(crate) fn missing(stage: impl Into<String>, key: impl Into<String>) -> Self {
        PipelineError::MissingParameter {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

fn format_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
