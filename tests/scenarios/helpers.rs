//! Test utilities shared by the scenario tests

use async_trait::async_trait;
use nanopipe::core::{ConfigStore, PipelineConfig, PipelineError};
use nanopipe::execution::{Invocation, ProcessReport, StageResult, StageRunner};
use nanopipe::{LogOptions, PipelineOrchestrator, RunOptions, RunReport, StartAt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Stub runner that records invocations instead of spawning tools
///
/// Every program succeeds unless registered with [`StubRunner::fail`].
/// When watching a configuration file, the file's contents are captured at
/// each invocation so tests can see what a stage observed.
pub struct StubRunner {
    invocations: Mutex<Vec<Invocation>>,
    snapshots: Mutex<Vec<PipelineConfig>>,
    failures: HashMap<String, (Option<i32>, String)>,
    watched: Option<PathBuf>,
    calls: AtomicUsize,
}

impl StubRunner {
    pub fn new() -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            snapshots: Mutex::new(Vec::new()),
            failures: HashMap::new(),
            watched: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Make a program exit unsuccessfully with the given stderr
    pub fn fail(mut self, program: &str, exit_code: Option<i32>, stderr: &str) -> Self {
        self.failures
            .insert(program.to_string(), (exit_code, stderr.to_string()));
        self
    }

    pub fn watching(mut self, config_path: &Path) -> Self {
        self.watched = Some(config_path.to_path_buf());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Programs in the order they were started
    pub fn programs(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .flat_map(|inv| inv.programs().into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    pub fn snapshots(&self) -> Vec<PipelineConfig> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageRunner for StubRunner {
    async fn run(&self, invocation: &Invocation) -> Result<StageResult, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().unwrap().push(invocation.clone());
        if let Some(path) = &self.watched {
            let config = ConfigStore::new(path).load()?;
            self.snapshots.lock().unwrap().push(config);
        }

        let processes = invocation
            .programs()
            .into_iter()
            .map(|program| match self.failures.get(program) {
                Some((code, stderr)) => ProcessReport::failed(program, *code, stderr),
                None => ProcessReport::succeeded(program),
            })
            .collect();

        Ok(StageResult { processes })
    }
}

/// Complete configuration for the standard pipeline, minus `threads`
pub fn standard_config(base: &Path) -> String {
    format!(
        "\
# sample metadata kept untouched by the pipeline
sample_name: liver_rep1
output: {}
fast5: /data/fast5
fastq: /data/reads.fastq
reference: /data/ref.fa
sequencing_summary: /data/sequencing_summary.txt
multi_to_single_fast5_path: multi_to_single_fast5
nanopolish_path: nanopolish
f5c_path: f5c
aligner_path: minimap2
geluster_path: GeLuster
pycoqc_path: pycoQC
",
        base.join("runs").display()
    )
}

/// Write a configuration file into `dir` and return its path
pub fn write_config(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("pipeline.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

pub fn load_config(path: &Path) -> PipelineConfig {
    ConfigStore::new(path).load().unwrap()
}

pub fn options(start: StartAt) -> RunOptions {
    RunOptions {
        overrides: Vec::new(),
        start,
        log: LogOptions::quiet(),
    }
}

pub async fn run(
    orchestrator: &PipelineOrchestrator<StubRunner>,
    config_path: &Path,
    start: StartAt,
) -> Result<RunReport, PipelineError> {
    orchestrator.run(config_path, &options(start)).await
}

/// Run roots created under a base directory, oldest first
pub fn run_roots(base: &Path) -> Vec<PathBuf> {
    let runs = base.join("runs");
    if !runs.exists() {
        return Vec::new();
    }
    let mut roots: Vec<PathBuf> = std::fs::read_dir(runs)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    roots.sort();
    roots
}

/// The single pipeline log of a run root
pub fn read_run_log(run_root: &Path) -> String {
    let logs: Vec<PathBuf> = std::fs::read_dir(run_root.join("logs"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("pipeline_"))
        })
        .collect();
    assert_eq!(logs.len(), 1, "expected exactly one pipeline log in {:?}", run_root);
    std::fs::read_to_string(&logs[0]).unwrap()
}

/// Assert that `needles` occur in `haystack` in the given order
pub fn assert_in_order(haystack: &str, needles: &[String]) {
    let mut from = 0;
    for needle in needles {
        match haystack[from..].find(needle.as_str()) {
            Some(offset) => from += offset + needle.len(),
            None => panic!("'{}' not found in order in:\n{}", needle, haystack),
        }
    }
}
