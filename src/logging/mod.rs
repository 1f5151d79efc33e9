//! Per-run log sink
//!
//! Every run writes its events to `logs/pipeline_<timestamp>.log` inside its
//! run root. The sink is a [`Dispatch`] scoped to the run rather than a
//! process-wide subscriber, so concurrent runs in one process (tests, for
//! instance) never write into each other's files.

use crate::core::error::PipelineError;
use crate::core::layout::TIMESTAMP_FORMAT;
use chrono::Local;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::Dispatch;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

/// Options for a run's log sink
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    /// Mirror events to standard error
    pub console: bool,
    /// Record debug events, including every spawned command line
    pub verbose: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            console: true,
            verbose: false,
        }
    }
}

impl LogOptions {
    /// File only, no console output
    pub fn quiet() -> Self {
        Self {
            console: false,
            verbose: false,
        }
    }

    fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }
}

/// Log sink bound to one file inside a run's log directory
pub struct RunLogger {
    dispatch: Dispatch,
    path: PathBuf,
}

impl RunLogger {
    /// Create the log file and the subscriber writing to it
    pub fn init(log_dir: &Path, options: &LogOptions) -> Result<Self, PipelineError> {
        let path = log_dir.join(format!("pipeline_{}.log", Local::now().format(TIMESTAMP_FORMAT)));
        let file = File::create(&path).map_err(|source| PipelineError::LogInit {
            path: path.clone(),
            source,
        })?;

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
            .with_filter(options.level());

        let console_layer = options.console.then(|| {
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(options.level())
        });

        let subscriber = Registry::default().with(file_layer).with(console_layer);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dispatcher to attach to the run with `WithSubscriber`
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }
}
