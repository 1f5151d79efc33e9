//! Test: Missing Parameter - configuration errors abort before any tool runs

use crate::helpers::*;
use nanopipe::core::PipelineError;
use nanopipe::{PipelineOrchestrator, StartAt};

#[tokio::test]
async fn test_missing_key_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = standard_config(dir.path()).replace("reference: /data/ref.fa\n", "");
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    let err = run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap_err();

    match &err {
        PipelineError::MissingParameter { stage, key } => {
            assert_eq!(stage, "align");
            assert_eq!(key, "reference");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.exit_code(), 1);
    assert_eq!(orchestrator.runner().call_count(), 0);
    assert!(run_roots(dir.path()).is_empty(), "no run root should be created");
}

#[tokio::test]
async fn test_missing_key_of_late_stage_is_caught_up_front() {
    let dir = tempfile::tempdir().unwrap();
    // Only pycoqc, the last standard stage, needs the summary
    let yaml = standard_config(dir.path()).replace("sequencing_summary: /data/sequencing_summary.txt\n", "");
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    let err = run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::MissingParameter { ref stage, ref key } if stage == "pycoqc" && key == "sequencing_summary"
    ));
    assert_eq!(orchestrator.runner().call_count(), 0);
}

#[tokio::test]
async fn test_failed_preflight_leaves_config_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = standard_config(dir.path()).replace("fastq: /data/reads.fastq\n", "");
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap_err();

    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), yaml);
}

#[tokio::test]
async fn test_unreadable_config_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    let missing = run(&orchestrator, &dir.path().join("absent.yaml"), StartAt::Beginning)
        .await
        .unwrap_err();
    assert!(matches!(missing, PipelineError::ConfigRead { .. }));

    let config_path = write_config(dir.path(), "- just\n- a list\n");
    let malformed = run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap_err();
    assert!(matches!(malformed, PipelineError::ConfigRead { .. }));

    assert_eq!(orchestrator.runner().call_count(), 0);
}

#[tokio::test]
async fn test_unknown_variant_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("{}pipeline_variant: minimal\n", standard_config(dir.path()));
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    let err = run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidParameter { ref key, .. } if key == "pipeline_variant"));
    assert_eq!(orchestrator.runner().call_count(), 0);
}
