//! Pipeline execution engine

pub mod capture;
pub mod engine;
pub mod runner;

pub use capture::{CapturedOutput, CAPTURE_LIMIT_BYTES};
pub use engine::{prepare, ExecutionEvent, PipelineOrchestrator, RunOptions, RunPlan, RunReport};
pub use runner::{CommandSpec, Invocation, ProcessReport, ProcessRunner, StageResult, StageRunner};
