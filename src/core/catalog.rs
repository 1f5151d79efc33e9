//! Stage catalog: one builder per external tool

use crate::core::error::PipelineError;
use crate::core::layout::RunDir;
use crate::core::pipeline::EventBackend;
use crate::core::stage::{sorted_bam_name, PlanBuilder, StageId, StageInputs, StagePlan, StageSpec};
use crate::execution::runner::{CommandSpec, Invocation};
use std::path::Path;

/// Definition of a stage for the given event backend
pub fn stage_spec(id: StageId, backend: EventBackend) -> StageSpec {
    match id {
        StageId::SplitFast5 => StageSpec {
            id,
            description: "Split multi-read FAST5 files into single-read files",
            output_dir: RunDir::SplitFast5,
            required: vec!["multi_to_single_fast5_path", "fast5", "threads"],
            optional: vec![],
            produces: vec!["single_fast5"],
            builder: split_fast5,
        },
        StageId::IndexReads => {
            // nanopolish index is single-threaded
            let (required, builder, optional): (Vec<&'static str>, PlanBuilder, Vec<&'static str>) = match backend {
                EventBackend::Nanopolish => (
                    vec!["nanopolish_path", "fast5", "fastq"],
                    index_reads_nanopolish,
                    vec!["sequencing_summary", "hdf5_plugin_path"],
                ),
                EventBackend::F5c => (
                    vec!["f5c_path", "fast5", "fastq", "threads"],
                    index_reads_f5c,
                    vec!["hdf5_plugin_path"],
                ),
            };
            StageSpec {
                id,
                description: "Index basecalled reads against their raw signal",
                output_dir: RunDir::Index,
                required,
                optional,
                produces: vec!["read_index"],
                builder,
            }
        }
        StageId::Align => StageSpec {
            id,
            description: "Align reads, then sort and index the alignments",
            output_dir: RunDir::Alignment,
            required: vec!["aligner_path", "reference", "fastq", "threads"],
            optional: vec!["samtools_path"],
            produces: vec!["sorted_bam"],
            builder: align,
        },
        StageId::Cluster => StageSpec {
            id,
            description: "Cluster reads into transcript groups",
            output_dir: RunDir::Cluster,
            required: vec!["geluster_path", "fastq", "threads"],
            optional: vec!["additional_samples"],
            produces: vec!["cluster_dir"],
            builder: cluster,
        },
        StageId::Polya => StageSpec {
            id,
            description: "Estimate poly(A) tail lengths",
            output_dir: RunDir::Polya,
            required: vec!["nanopolish_path", "fastq", "sorted_bam", "reference", "threads"],
            optional: vec!["hdf5_plugin_path"],
            produces: vec!["polya_results"],
            builder: polya,
        },
        StageId::Eventalign => {
            let (tool, builder): (&'static str, PlanBuilder) = match backend {
                EventBackend::Nanopolish => ("nanopolish_path", eventalign_nanopolish),
                EventBackend::F5c => ("f5c_path", eventalign_f5c),
            };
            StageSpec {
                id,
                description: "Align raw signal events to the reference",
                output_dir: RunDir::Eventalign,
                required: vec![tool, "fastq", "sorted_bam", "reference", "threads"],
                optional: vec!["hdf5_plugin_path"],
                produces: vec!["eventalign_results"],
                builder,
            }
        }
        StageId::Pycoqc => StageSpec {
            id,
            description: "Generate the per-run QC report",
            output_dir: RunDir::Qc,
            required: vec!["pycoqc_path", "sequencing_summary"],
            optional: vec!["gzip_path"],
            produces: vec!["pycoqc_report"],
            builder: pycoqc,
        },
        StageId::Multiqc => StageSpec {
            id,
            description: "Aggregate QC results across the run",
            output_dir: RunDir::Qc,
            required: vec!["single_fast5"],
            optional: vec!["multiqc_path"],
            produces: vec!["multiqc_report"],
            builder: multiqc,
        },
    }
}

fn split_fast5(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let save_path = inputs.output_dir(RunDir::SplitFast5);
    let command = CommandSpec::new(inputs.require("multi_to_single_fast5_path")?)
        .arg("--threads")
        .arg(inputs.threads()?.to_string())
        .arg("--input_path")
        .arg(inputs.require("fast5")?)
        .arg("--save_path")
        .arg(path_arg(&save_path));

    Ok(StagePlan::default()
        .invoke(Invocation::Direct(command))
        .produce("single_fast5", &save_path))
}

fn index_reads_nanopolish(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let fastq = inputs.require("fastq")?;
    let mut command = CommandSpec::new(inputs.require("nanopolish_path")?)
        .arg("index")
        .arg("-d")
        .arg(inputs.require("fast5")?);
    if let Some(summary) = inputs.optional("sequencing_summary") {
        command = command.arg("-s").arg(summary);
    }
    let command = command.arg(&fastq).envs(inputs.signal_env());

    Ok(StagePlan::default()
        .invoke(Invocation::Direct(command))
        .produce("read_index", format!("{}.index", fastq)))
}

fn index_reads_f5c(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let fastq = inputs.require("fastq")?;
    let command = CommandSpec::new(inputs.require("f5c_path")?)
        .arg("index")
        .arg("-t")
        .arg(inputs.threads()?.to_string())
        .arg("-d")
        .arg(inputs.require("fast5")?)
        .arg(&fastq)
        .envs(inputs.signal_env());

    Ok(StagePlan::default()
        .invoke(Invocation::Direct(command))
        .produce("read_index", format!("{}.index", fastq)))
}

fn align(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let fastq = inputs.require("fastq")?;
    let threads = inputs.threads()?.to_string();
    let samtools = inputs.tool_or("samtools_path", "samtools");
    let sorted_bam = inputs
        .output_dir(RunDir::Alignment)
        .join(sorted_bam_name(Path::new(&fastq)));

    let aligner = CommandSpec::new(inputs.require("aligner_path")?)
        .args(["-ax", "map-ont", "-t"])
        .arg(&threads)
        .arg(inputs.require("reference")?)
        .arg(&fastq);
    let sort = CommandSpec::new(&samtools)
        .args(["sort", "-@"])
        .arg(&threads)
        .arg("-o")
        .arg(path_arg(&sorted_bam));
    let index = CommandSpec::new(&samtools).arg("index").arg(path_arg(&sorted_bam));

    Ok(StagePlan::default()
        .invoke(Invocation::Piped {
            producer: aligner,
            consumer: sort,
        })
        .invoke(Invocation::Direct(index))
        .produce("sorted_bam", &sorted_bam))
}

fn cluster(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let cluster_dir = inputs.output_dir(RunDir::Cluster);
    let mut command = CommandSpec::new(inputs.require("geluster_path")?)
        .arg("-r")
        .arg(inputs.require("fastq")?)
        .arg("-t")
        .arg(inputs.threads()?.to_string())
        .arg("-o")
        .arg(path_arg(&cluster_dir));

    let samples = inputs.list("additional_samples");
    if !samples.is_empty() {
        command = command.arg("--multi").arg(samples.join(","));
    }

    Ok(StagePlan::default()
        .invoke(Invocation::Direct(command))
        .produce("cluster_dir", &cluster_dir))
}

fn polya(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let results = inputs.output_dir(RunDir::Polya).join("polya_results.tsv");
    let command = CommandSpec::new(inputs.require("nanopolish_path")?)
        .arg("polya")
        .arg(format!("--threads={}", inputs.threads()?))
        .arg(format!("--reads={}", inputs.require("fastq")?))
        .arg(format!("--bam={}", inputs.require("sorted_bam")?))
        .arg(format!("--genome={}", inputs.require("reference")?))
        .envs(inputs.signal_env());

    Ok(StagePlan::default()
        .invoke(Invocation::ToFile {
            command,
            path: results.clone(),
        })
        .produce("polya_results", &results))
}

fn eventalign_command(inputs: &StageInputs<'_>, tool_key: &str) -> Result<CommandSpec, PipelineError> {
    Ok(CommandSpec::new(inputs.require(tool_key)?)
        .arg("eventalign")
        .arg("--reads")
        .arg(inputs.require("fastq")?)
        .arg("--bam")
        .arg(inputs.require("sorted_bam")?)
        .arg("--genome")
        .arg(inputs.require("reference")?)
        .arg("--threads")
        .arg(inputs.threads()?.to_string()))
}

fn eventalign_plan(inputs: &StageInputs<'_>, command: CommandSpec) -> StagePlan {
    let results = inputs.output_dir(RunDir::Eventalign).join("eventalign.tsv");
    StagePlan::default()
        .invoke(Invocation::ToFile {
            command: command.envs(inputs.signal_env()),
            path: results.clone(),
        })
        .produce("eventalign_results", &results)
}

fn eventalign_nanopolish(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let command = eventalign_command(inputs, "nanopolish_path")?.args(["--progress", "--scale-events"]);
    Ok(eventalign_plan(inputs, command))
}

fn eventalign_f5c(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let command = eventalign_command(inputs, "f5c_path")?.arg("--scale-events");
    Ok(eventalign_plan(inputs, command))
}

fn pycoqc(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let qc = inputs.output_dir(RunDir::Qc);
    let summary = inputs.require("sequencing_summary")?;
    let summary_name = Path::new(&summary)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sequencing_summary.txt".to_string());
    let compressed = qc.join(format!("{}.gz", summary_name));
    let report = qc.join("pycoqc_report.html");

    let gzip = CommandSpec::new(inputs.tool_or("gzip_path", "gzip"))
        .arg("-c")
        .arg(&summary);
    let pycoqc = CommandSpec::new(inputs.require("pycoqc_path")?)
        .arg("-f")
        .arg(path_arg(&compressed))
        .arg("-o")
        .arg(path_arg(&report));

    Ok(StagePlan::default()
        .invoke(Invocation::ToFile {
            command: gzip,
            path: compressed,
        })
        .invoke(Invocation::Direct(pycoqc))
        .produce("pycoqc_report", &report))
}

fn multiqc(inputs: &StageInputs<'_>) -> Result<StagePlan, PipelineError> {
    let qc = inputs.output_dir(RunDir::Qc);
    let command = CommandSpec::new(inputs.tool_or("multiqc_path", "multiqc"))
        .arg(inputs.require("single_fast5")?)
        .arg("-o")
        .arg(path_arg(&qc));

    Ok(StagePlan::default()
        .invoke(Invocation::Direct(command))
        .produce("multiqc_report", qc.join("multiqc_report.html")))
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
