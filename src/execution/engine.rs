//! Pipeline orchestrator - runs the stage chain of one configuration

use crate::{
    core::{
        config::{ConfigStore, PipelineConfig},
        error::PipelineError,
        layout::{OutputLayout, RunLayout},
        pipeline::{Pipeline, StartAt},
        stage::{parse_threads, StageId, StagePlan, StageSpec, LAST_COMPLETED_KEY, THREADS_KEY},
    },
    execution::runner::{ProcessReport, StageRunner},
    logging::{LogOptions, RunLogger},
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

/// Events emitted while a run progresses
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_root: PathBuf,
        log_file: PathBuf,
    },
    StageSkipped {
        stage: StageId,
    },
    StageStarted {
        stage: StageId,
        position: usize,
        total: usize,
    },
    StageCompleted {
        stage: StageId,
    },
    /// A stage succeeded without leaving an expected output behind
    OutputMissing {
        stage: StageId,
        path: PathBuf,
    },
    StageFailed {
        stage: StageId,
        error: String,
    },
    RunCompleted {
        completed: usize,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Options of one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `key=value` pairs applied on top of the loaded configuration
    pub overrides: Vec<(String, String)>,
    pub start: StartAt,
    pub log: LogOptions,
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_root: PathBuf,
    pub log_file: PathBuf,
    pub completed: Vec<StageId>,
    /// Stages before the start point, whose committed keys were reused
    pub skipped: Vec<StageId>,
}

/// Stage chain resolved against a configuration
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub pipeline: Pipeline,
    /// Index of the first stage to execute
    pub start: usize,
    /// Base directory receiving the run root
    pub output: PathBuf,
    /// Whether `threads` was derived from the host
    pub threads_derived: bool,
}

/// Resolve the plan of a run and check that every stage can find its inputs
///
/// Mutates `config` the way the run will persist it: `threads` is derived
/// when absent, the derived keys of the stages about to run are dropped and
/// `last_completed_stage` names the stage preceding the start. Nothing is
/// spawned and nothing is written.
pub fn prepare(config: &mut PipelineConfig, start: StartAt) -> Result<RunPlan, PipelineError> {
    let threads_derived = resolve_threads(config)?;

    let pipeline = Pipeline::from_config(config)?;
    let start = pipeline.start_index(config, start)?;

    // A rerun must never read a value left over from an earlier run
    for key in pipeline.produced_keys(start) {
        config.remove(key);
    }
    // The resume marker must point just before the first stage that reruns
    match start.checked_sub(1) {
        Some(previous) => config.set(LAST_COMPLETED_KEY, pipeline.stages()[previous].id.as_str()),
        None => {
            config.remove(LAST_COMPLETED_KEY);
        }
    }

    pipeline.check_inputs(start, config)?;

    let output = config
        .get_path("output")
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| PipelineError::missing("pipeline", "output"))?;

    Ok(RunPlan {
        pipeline,
        start,
        output,
        threads_derived,
    })
}

/// Validate `threads`, deriving it from host parallelism when unset
fn resolve_threads(config: &mut PipelineConfig) -> Result<bool, PipelineError> {
    match config.get_str(THREADS_KEY) {
        Some(raw) => {
            parse_threads(&raw)?;
            Ok(false)
        }
        None => {
            config.set(THREADS_KEY, num_cpus::get() as u64);
            Ok(true)
        }
    }
}

/// Runs the stages of a configuration in order, committing derived keys
/// after every successful stage
pub struct PipelineOrchestrator<R> {
    runner: R,
    event_handlers: Vec<EventHandler>,
}

impl<R: StageRunner> PipelineOrchestrator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            event_handlers: Vec::new(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(&event);
        }
    }

    /// Run the pipeline described by a configuration file
    ///
    /// Configuration and layout errors are returned before any stage runs.
    /// From the moment the run root exists every event, including the
    /// final error, is recorded in the run's log file.
    pub async fn run(&self, config_path: &Path, options: &RunOptions) -> Result<RunReport, PipelineError> {
        let store = ConfigStore::new(config_path);
        let mut config = store.load()?;
        for (key, value) in &options.overrides {
            config.apply_override(key, value);
        }

        let plan = prepare(&mut config, options.start)?;
        let layout = OutputLayout::new(&plan.output).create()?;
        let logger = RunLogger::init(&layout.logs(), &options.log)?;

        self.emit_event(ExecutionEvent::RunStarted {
            run_root: layout.root().to_path_buf(),
            log_file: logger.path().to_path_buf(),
        });

        let log_file = logger.path().to_path_buf();
        async move {
            let result = self.execute(&store, config, &plan, &layout).await;
            match result {
                Ok((completed, skipped)) => {
                    info!("Pipeline completed: {} stage(s) run", completed.len());
                    self.emit_event(ExecutionEvent::RunCompleted {
                        completed: completed.len(),
                    });
                    Ok(RunReport {
                        run_root: layout.root().to_path_buf(),
                        log_file,
                        completed,
                        skipped,
                    })
                }
                Err(e) => {
                    error!("Pipeline aborted: {}", e);
                    Err(e)
                }
            }
        }
        .with_subscriber(logger.dispatch().clone())
        .await
    }

    async fn execute(
        &self,
        store: &ConfigStore,
        mut config: PipelineConfig,
        plan: &RunPlan,
        layout: &RunLayout,
    ) -> Result<(Vec<StageId>, Vec<StageId>), PipelineError> {
        let pipeline = &plan.pipeline;
        info!("Configuration: {}", store.path().display());
        info!("Run directory: {}", layout.root().display());
        info!(
            "Pipeline variant: {} (event backend: {})",
            pipeline.variant(),
            pipeline.backend()
        );
        if plan.threads_derived {
            info!(
                "threads not configured, using {} detected from host",
                config.get_str(THREADS_KEY).unwrap_or_default()
            );
        }

        // Persist derived threads, overrides and cleared keys before any
        // stage can observe them
        store.save(&config)?;

        let stages = pipeline.stages();
        let mut skipped = Vec::new();
        for stage in &stages[..plan.start] {
            info!("Skipping stage: {} (reusing committed outputs)", stage.id);
            self.emit_event(ExecutionEvent::StageSkipped { stage: stage.id });
            skipped.push(stage.id);
        }
        if plan.start == stages.len() {
            info!("Nothing to run: every stage has already completed");
        }

        let mut completed = Vec::new();
        for (position, stage) in stages.iter().enumerate().skip(plan.start) {
            info!("Starting stage: {}", stage.id);
            self.emit_event(ExecutionEvent::StageStarted {
                stage: stage.id,
                position: position + 1,
                total: stages.len(),
            });

            let stage_plan = match self.run_stage(stage, &config, layout).await {
                Ok(stage_plan) => stage_plan,
                Err(e) => {
                    self.emit_event(ExecutionEvent::StageFailed {
                        stage: stage.id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };

            for (key, value) in &stage_plan.produces {
                debug!("Committing {} = {}", key, value);
                config.set(key.as_str(), value.as_str());
            }
            config.set(LAST_COMPLETED_KEY, stage.id.as_str());
            store.save(&config)?;

            for path in &stage_plan.expected_outputs {
                if !path.exists() {
                    warn!(
                        "Stage '{}' succeeded but expected output {} is missing",
                        stage.id,
                        path.display()
                    );
                    self.emit_event(ExecutionEvent::OutputMissing {
                        stage: stage.id,
                        path: path.clone(),
                    });
                }
            }

            info!("Completed stage: {}", stage.id);
            self.emit_event(ExecutionEvent::StageCompleted { stage: stage.id });
            completed.push(stage.id);
        }

        Ok((completed, skipped))
    }

    /// Build and run one stage's invocations, stopping at the first failure
    async fn run_stage(
        &self,
        stage: &StageSpec,
        config: &PipelineConfig,
        layout: &RunLayout,
    ) -> Result<StagePlan, PipelineError> {
        let plan = stage.plan(config, layout)?;

        let mut reports: Vec<ProcessReport> = Vec::new();
        let mut outcome = Ok(());
        for invocation in &plan.invocations {
            info!("Running: {}", invocation);
            let result = match self.runner.run(invocation).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Stage '{}' could not start: {}", stage.id, e);
                    outcome = Err(e);
                    break;
                }
            };

            let failure = result.failing_process().cloned();
            reports.extend(result.processes);
            if let Some(failed) = failure {
                outcome = Err(stage_failure(stage.id, &failed));
                break;
            }
        }

        if !reports.is_empty() {
            let path = layout.logs().join(format!("{}.diagnostics.log", stage.id));
            match tokio::fs::write(&path, render_diagnostics(&reports)).await {
                Ok(()) => debug!("Captured output written to {}", path.display()),
                Err(e) => warn!("Failed to write {}: {}", path.display(), e),
            }
        }

        outcome.map(|()| plan)
    }
}

/// Log a failed process and turn it into a stage failure
fn stage_failure(stage: StageId, failed: &ProcessReport) -> PipelineError {
    let err = PipelineError::StageFailure {
        stage: stage.to_string(),
        program: failed.program.clone(),
        exit_code: failed.exit_code,
        diagnostic: failed.stderr.first_line().unwrap_or_default().to_string(),
    };

    error!("{}", err);
    match failed.stderr.first_line() {
        Some(line) => error!("{} stderr: {}", failed.program, line),
        None => error!("{} wrote nothing to stderr", failed.program),
    }
    if let Some(note) = failed.stderr.truncation_note() {
        warn!("{} stderr {}", failed.program, note);
    }

    err
}

fn render_diagnostics(reports: &[ProcessReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let status = match report.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let _ = writeln!(out, "== {} ({}) ==", report.program, status);
        for (name, captured) in [("stdout", &report.stdout), ("stderr", &report.stderr)] {
            let _ = writeln!(out, "-- {} ({} bytes) --", name, captured.total_bytes);
            out.push_str(&captured.text);
            if !captured.text.is_empty() && !captured.text.ends_with('\n') {
                out.push('\n');
            }
            if let Some(note) = captured.truncation_note() {
                let _ = writeln!(out, "[{}]", note);
            }
        }
    }
    out
}
