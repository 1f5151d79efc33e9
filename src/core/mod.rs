//! Core domain models for the pipeline
//!
//! Configuration, run layout, the stage catalog and the error taxonomy
//! shared by every other module.

pub mod catalog;
pub mod config;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod stage;

pub use config::{ConfigStore, PipelineConfig};
pub use error::PipelineError;
pub use layout::{OutputLayout, RunDir, RunLayout};
pub use pipeline::{EventBackend, Pipeline, PipelineVariant, StartAt};
pub use stage::{StageId, StagePlan, StageSpec};
