//! Test: Piped Failure - the aligner feeding the sorter fails

use crate::helpers::*;
use nanopipe::core::PipelineError;
use nanopipe::{LogOptions, PipelineOrchestrator, ProcessRunner, RunOptions, StartAt};

#[tokio::test]
async fn test_stubbed_producer_failure_names_producer() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("{}threads: 2\npipeline_variant: core\n", standard_config(dir.path()));
    let config_path = write_config(dir.path(), &yaml);
    let runner = StubRunner::new().fail("minimap2", Some(3), "[ERROR] failed to open file");
    let orchestrator = PipelineOrchestrator::new(runner);

    let err = run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap_err();

    match err {
        PipelineError::StageFailure {
            stage,
            program,
            exit_code,
            diagnostic,
        } => {
            assert_eq!(stage, "align");
            assert_eq!(program, "minimap2");
            assert_eq!(exit_code, Some(3));
            assert_eq!(diagnostic, "[ERROR] failed to open file");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // samtools index is not attempted after the failed pipe
    let programs = orchestrator.runner().programs();
    assert_eq!(programs.iter().filter(|p| p.as_str() == "samtools").count(), 1);
}

/// Real processes: `false` stands in for the aligner and `true` for the
/// other tools, so the sorter sees its input close and exits cleanly
#[cfg(unix)]
#[tokio::test]
async fn test_real_producer_failure_stops_alignment() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "\
output: {}
fast5: /data/fast5
fastq: /data/reads.fastq
reference: /data/ref.fa
threads: 1
pipeline_variant: core
multi_to_single_fast5_path: true
nanopolish_path: true
aligner_path: 'false'
samtools_path: 'true'
",
        dir.path().join("runs").display()
    );
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(ProcessRunner::new());
    let options = RunOptions {
        log: LogOptions::quiet(),
        ..RunOptions::default()
    };

    let err = orchestrator.run(&config_path, &options).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::StageFailure { ref stage, ref program, exit_code: Some(1), .. }
            if stage == "align" && program == "false"
    ));
    assert_eq!(err.exit_code(), 1);

    let roots = run_roots(dir.path());
    let diagnostics =
        std::fs::read_to_string(roots[0].join("logs").join("align.diagnostics.log")).unwrap();
    assert!(diagnostics.contains("== false (exit code 1) =="));
    assert!(diagnostics.contains("== true (exit code 0) =="));

    let saved = load_config(&config_path);
    assert_eq!(saved.get_str("last_completed_stage").as_deref(), Some("index_reads"));
}

/// Real processes: the sorter fails without reading, so the aligner dies of
/// a broken pipe and the sorter's exit status is the one reported
#[cfg(unix)]
#[tokio::test]
async fn test_real_consumer_failure_propagates_its_exit_code() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let sorter = dir.path().join("samtools");
    std::fs::write(&sorter, "#!/bin/sh\necho 'samtools sort: disk full' >&2\nexit 4\n").unwrap();
    std::fs::set_permissions(&sorter, std::fs::Permissions::from_mode(0o755)).unwrap();

    let yaml = format!(
        "\
output: {}
fast5: /data/fast5
fastq: /data/reads.fastq
reference: /data/ref.fa
threads: 1
pipeline_variant: core
multi_to_single_fast5_path: 'true'
nanopolish_path: 'true'
aligner_path: 'yes'
samtools_path: {}
",
        dir.path().join("runs").display(),
        sorter.display()
    );
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(ProcessRunner::new());
    let options = RunOptions {
        log: LogOptions::quiet(),
        ..RunOptions::default()
    };

    let err = orchestrator.run(&config_path, &options).await.unwrap_err();

    match &err {
        PipelineError::StageFailure {
            stage,
            program,
            exit_code,
            diagnostic,
        } => {
            assert_eq!(stage, "align");
            assert_eq!(program, &sorter.display().to_string());
            assert_eq!(*exit_code, Some(4));
            assert_eq!(diagnostic, "samtools sort: disk full");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.exit_code(), 4);

    let roots = run_roots(dir.path());
    let log = read_run_log(&roots[0]);
    assert!(log.contains("stderr: samtools sort: disk full"));
}
