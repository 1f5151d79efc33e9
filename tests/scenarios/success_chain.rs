//! Test: Success Chain - every stage runs in order and commits its keys

use crate::helpers::*;
use nanopipe::core::{PipelineConfig, StageId};
use nanopipe::execution::Invocation;
use nanopipe::{PipelineOrchestrator, StartAt};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_standard_chain_commits_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("{}threads: 4\n", standard_config(dir.path()));
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    let report = run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap();

    assert_eq!(
        report.completed,
        vec![
            StageId::SplitFast5,
            StageId::IndexReads,
            StageId::Align,
            StageId::Cluster,
            StageId::Polya,
            StageId::Pycoqc,
        ]
    );
    assert!(report.skipped.is_empty());
    assert_eq!(
        orchestrator.runner().programs(),
        vec![
            "multi_to_single_fast5",
            "nanopolish",
            "minimap2",
            "samtools",
            "samtools",
            "GeLuster",
            "nanopolish",
            "gzip",
            "pycoQC",
        ]
    );

    let root = report.run_root.display().to_string();
    let saved = load_config(&config_path);
    assert_eq!(saved.get_str("sample_name").as_deref(), Some("liver_rep1"));
    assert_eq!(saved.get_str("threads").as_deref(), Some("4"));
    assert_eq!(saved.get_str("last_completed_stage").as_deref(), Some("pycoqc"));
    assert_eq!(
        saved.get_str("read_index").as_deref(),
        Some("/data/reads.fastq.index")
    );
    for key in ["single_fast5", "sorted_bam", "cluster_dir", "polya_results", "pycoqc_report"] {
        let value = saved.get_str(key).unwrap_or_else(|| panic!("{} not committed", key));
        assert!(value.starts_with(&root), "{} = {} is outside {}", key, value, root);
    }
}

#[tokio::test]
async fn test_config_persisted_before_each_stage() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("{}threads: 2\npipeline_variant: core\n", standard_config(dir.path()));
    let config_path = write_config(dir.path(), &yaml);
    let original = load_config(&config_path);

    let runner = StubRunner::new().watching(&config_path);
    let orchestrator = PipelineOrchestrator::new(runner);
    run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap();

    // One snapshot per invocation: split, index, align pipe, samtools index
    let snapshots = orchestrator.runner().snapshots();
    assert_eq!(snapshots.len(), 4);

    let key_sets: Vec<(bool, bool, bool)> = snapshots
        .iter()
        .map(|c| (c.contains("single_fast5"), c.contains("read_index"), c.contains("sorted_bam")))
        .collect();
    assert_eq!(
        key_sets,
        vec![
            (false, false, false),
            (true, false, false),
            (true, true, false),
            (true, true, false),
        ]
    );

    // Every key present before a stage survives its commit
    let saved = load_config(&config_path);
    for key in original.keys() {
        assert_eq!(saved.get(&key), original.get(&key), "{} changed", key);
    }
    for pair in snapshots.windows(2) {
        for key in pair[0].keys().into_iter().filter(|k| k != "last_completed_stage") {
            assert_eq!(pair[1].get(&key), pair[0].get(&key), "{} changed between stages", key);
        }
    }
}

#[tokio::test]
async fn test_end_to_end_derives_threads_and_logs_stage_order() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(dir.path(), &standard_config(dir.path()));
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    let report = run(&orchestrator, &config_path, StartAt::Beginning).await.unwrap();

    let saved = load_config(&config_path);
    assert_eq!(saved.get_str("threads"), Some(num_cpus::get().to_string()));

    let aligner = orchestrator
        .runner()
        .invocations()
        .into_iter()
        .find_map(|inv| match inv {
            Invocation::Piped { producer, .. } => Some(producer),
            _ => None,
        })
        .unwrap();
    assert!(aligner.args.contains(&num_cpus::get().to_string()));

    assert!(report.log_file.starts_with(report.run_root.join("logs")));
    let log = read_run_log(&report.run_root);
    let expected: Vec<String> = report
        .completed
        .iter()
        .flat_map(|stage| {
            [
                format!("Starting stage: {}", stage),
                format!("Completed stage: {}", stage),
            ]
        })
        .collect();
    assert_eq!(expected.len(), 12);
    assert_in_order(&log, &expected);
    assert!(log.contains("threads not configured"));
}

#[tokio::test]
async fn test_overrides_select_backend_and_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("{}pipeline_variant: full\n", standard_config(dir.path()));
    let config_path = write_config(dir.path(), &yaml);
    let orchestrator = PipelineOrchestrator::new(StubRunner::new());

    let mut opts = options(StartAt::Beginning);
    opts.overrides = vec![
        ("event_backend".to_string(), "f5c".to_string()),
        ("threads".to_string(), "6".to_string()),
    ];
    let report = orchestrator.run(&config_path, &opts).await.unwrap();

    assert_eq!(report.completed, StageId::ALL.to_vec());
    let programs = orchestrator.runner().programs();
    assert_eq!(programs[1], "f5c");
    assert!(programs.contains(&"multiqc".to_string()));

    let saved: PipelineConfig = load_config(&config_path);
    assert_eq!(saved.get_str("event_backend").as_deref(), Some("f5c"));
    assert_eq!(saved.get_str("threads").as_deref(), Some("6"));
    assert!(matches!(saved.get("threads"), Some(serde_yaml::Value::Number(_))));
}

#[tokio::test]
async fn test_each_run_gets_its_own_root() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!("{}threads: 1\npipeline_variant: core\n", standard_config(dir.path()));
    let config_path = write_config(dir.path(), &yaml);

    let first = PipelineOrchestrator::new(StubRunner::new());
    let first = run(&first, &config_path, StartAt::Beginning).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = PipelineOrchestrator::new(StubRunner::new());
    let second = run(&second, &config_path, StartAt::Beginning).await.unwrap();

    assert_ne!(first.run_root, second.run_root);
    assert_eq!(run_roots(dir.path()), vec![first.run_root.clone(), second.run_root.clone()]);

    // The rerun replaced the first run's derived paths
    let saved = load_config(&config_path);
    let bam = saved.get_str("sorted_bam").unwrap();
    assert!(bam.starts_with(&second.run_root.display().to_string()));
}
