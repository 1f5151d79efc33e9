//! External tool invocation

use crate::core::error::PipelineError;
use crate::execution::capture::{capture_opt, CapturedOutput, CAPTURE_LIMIT_BYTES};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Program, arguments and extra environment of one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: Vec<(String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn launch_error(&self, source: io::Error) -> PipelineError {
        PipelineError::Launch {
            program: self.program.clone(),
            source,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Shape of one external invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Invocation {
    /// One process, both streams captured
    Direct(CommandSpec),
    /// Producer's standard output feeds the consumer's standard input
    Piped {
        producer: CommandSpec,
        consumer: CommandSpec,
    },
    /// Standard output written to a file, standard error captured
    ToFile { command: CommandSpec, path: PathBuf },
}

impl Invocation {
    /// Program names in pipeline order
    pub fn programs(&self) -> Vec<&str> {
        match self {
            Invocation::Direct(command) | Invocation::ToFile { command, .. } => {
                vec![command.program.as_str()]
            }
            Invocation::Piped { producer, consumer } => {
                vec![producer.program.as_str(), consumer.program.as_str()]
            }
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Direct(command) => write!(f, "{}", command),
            Invocation::Piped { producer, consumer } => write!(f, "{} | {}", producer, consumer),
            Invocation::ToFile { command, path } => write!(f, "{} > {}", command, path.display()),
        }
    }
}

/// Outcome of one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub program: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
}

impl ProcessReport {
    pub fn succeeded(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            exit_code: Some(0),
            success: true,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::default(),
        }
    }

    pub fn failed(program: impl Into<String>, exit_code: Option<i32>, stderr: &str) -> Self {
        Self {
            program: program.into(),
            exit_code,
            success: false,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput {
                text: stderr.to_string(),
                truncated: false,
                total_bytes: stderr.len() as u64,
            },
        }
    }
}

/// Outcome of one invocation, processes in pipeline order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub processes: Vec<ProcessReport>,
}

impl StageResult {
    pub fn success(&self) -> bool {
        self.processes.iter().all(|p| p.success)
    }

    /// Process to blame for a failed invocation
    ///
    /// A process that exited with a code wins over one terminated by a
    /// signal: a producer killed by a broken pipe only reflects its
    /// consumer's failure. Ties go to the earlier process in the pipe.
    pub fn failing_process(&self) -> Option<&ProcessReport> {
        self.processes
            .iter()
            .filter(|p| !p.success)
            .min_by_key(|p| p.exit_code.is_none())
    }
}

/// Executes invocations - allows stubbing external tools in tests
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run an invocation to completion
    ///
    /// A tool exiting unsuccessfully is reported in the [`StageResult`];
    /// `Err` means a process could not be started at all.
    async fn run(&self, invocation: &Invocation) -> Result<StageResult, PipelineError>;
}

/// Runs invocations as child processes
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    capture_limit: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            capture_limit: CAPTURE_LIMIT_BYTES,
        }
    }

    /// Override the per-stream capture limit
    pub fn with_capture_limit(mut self, limit: usize) -> Self {
        self.capture_limit = limit;
        self
    }

    async fn run_direct(&self, spec: &CommandSpec) -> Result<StageResult, PipelineError> {
        debug!("Spawning: {}", spec);
        let child = spec
            .command()
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| spec.launch_error(e))?;

        let report = self.collect(&spec.program, child).await?;
        Ok(StageResult {
            processes: vec![report],
        })
    }

    async fn run_piped(
        &self,
        producer: &CommandSpec,
        consumer: &CommandSpec,
    ) -> Result<StageResult, PipelineError> {
        debug!("Spawning: {} | {}", producer, consumer);
        let mut producer_child = producer
            .command()
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| producer.launch_error(e))?;

        // The temporary Command owns the parent's end of the pipe and is
        // dropped as soon as the consumer is spawned
        let consumer_child = match producer_child.stdout.take() {
            Some(pipe) => TryInto::<Stdio>::try_into(pipe).and_then(|stdin| {
                consumer.command().stdin(stdin).stdout(Stdio::piped()).spawn()
            }),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "producer stdout was not captured",
            )),
        };

        let consumer_child = match consumer_child {
            Ok(child) => child,
            Err(e) => {
                if let Err(kill_err) = producer_child.kill().await {
                    debug!("Failed to stop {}: {}", producer.program, kill_err);
                }
                return Err(consumer.launch_error(e));
            }
        };

        let (producer_report, consumer_report) = tokio::join!(
            self.collect(&producer.program, producer_child),
            self.collect(&consumer.program, consumer_child),
        );

        Ok(StageResult {
            processes: vec![producer_report?, consumer_report?],
        })
    }

    async fn run_to_file(&self, spec: &CommandSpec, path: &Path) -> Result<StageResult, PipelineError> {
        debug!("Spawning: {} > {}", spec, path.display());
        let file = std::fs::File::create(path).map_err(|source| PipelineError::Redirect {
            path: path.to_path_buf(),
            source,
        })?;

        let child = spec
            .command()
            .stdout(Stdio::from(file))
            .spawn()
            .map_err(|e| spec.launch_error(e))?;

        let report = self.collect(&spec.program, child).await?;
        Ok(StageResult {
            processes: vec![report],
        })
    }

    /// Wait for a child while draining whichever streams are piped
    async fn collect(&self, program: &str, mut child: Child) -> Result<ProcessReport, PipelineError> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, stdout, stderr) = tokio::join!(
            child.wait(),
            capture_opt(stdout, self.capture_limit),
            capture_opt(stderr, self.capture_limit),
        );
        let status = status.map_err(|source| PipelineError::Launch {
            program: program.to_string(),
            source,
        })?;

        debug!("{} exited with {}", program, status);
        Ok(ProcessReport {
            program: program.to_string(),
            exit_code: status.code(),
            success: status.success(),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<StageResult, PipelineError> {
        match invocation {
            Invocation::Direct(command) => self.run_direct(command).await,
            Invocation::Piped { producer, consumer } => self.run_piped(producer, consumer).await,
            Invocation::ToFile { command, path } => self.run_to_file(command, path).await,
        }
    }
}
