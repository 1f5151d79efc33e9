//! nanopipe - staged orchestration of a nanopore direct-RNA toolchain

pub mod cli;
pub mod core;
pub mod execution;
pub mod logging;

// Re-export commonly used types
pub use crate::core::{ConfigStore, PipelineConfig, PipelineError, StageId, StartAt};
pub use execution::{PipelineOrchestrator, ProcessRunner, RunOptions, RunReport, StageRunner};
pub use logging::{LogOptions, RunLogger};
