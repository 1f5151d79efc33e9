//! CLI output formatting

use crate::core::error::PipelineError;
use crate::core::pipeline::PlanSummary;
use crate::execution::{ExecutionEvent, RunReport};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted { run_root, log_file } => format!(
            "{} Run directory {}\n   log: {}",
            ROCKET,
            style(run_root.display()).bold(),
            style(log_file.display()).dim()
        ),
        ExecutionEvent::StageSkipped { stage } => format!(
            "{} {} {}",
            INFO,
            style(stage).dim(),
            style("(already completed)").dim()
        ),
        ExecutionEvent::StageStarted {
            stage,
            position,
            total,
        } => format!(
            "{} [{}/{}] {}",
            SPINNER,
            style(position).dim(),
            style(total).dim(),
            style(stage).cyan()
        ),
        ExecutionEvent::StageCompleted { stage } => format!("{} {}", CHECK, style(stage).green()),
        ExecutionEvent::OutputMissing { stage, path } => format!(
            "{} {} did not produce {}",
            WARN,
            style(stage).yellow(),
            style(path.display()).dim()
        ),
        ExecutionEvent::StageFailed { stage, error } => {
            format!("{} {}: {}", CROSS, style(stage).red(), style(error).dim())
        }
        ExecutionEvent::RunCompleted { completed } => format!(
            "{} {} stage(s) {}",
            INFO,
            style(completed).cyan(),
            style("completed").green()
        ),
    }
}

/// Format the final summary of a successful run
pub fn format_run_report(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "{} Pipeline completed {}",
        CHECK,
        style("successfully").green()
    )];
    lines.push(format!("  Stages run: {}", style(report.completed.len()).cyan()));
    if !report.skipped.is_empty() {
        lines.push(format!("  Stages reused: {}", style(report.skipped.len()).dim()));
    }
    lines.push(format!("  Output: {}", style(report.run_root.display()).bold()));
    lines.push(format!("  Log: {}", style(report.log_file.display()).dim()));
    lines.join("\n")
}

/// Format a stage plan, one line per stage
pub fn format_plan(summary: &PlanSummary) -> String {
    let mut lines = vec![format!(
        "  Variant: {} (event backend: {})",
        style(summary.variant).bold(),
        style(summary.backend).bold()
    )];
    for (i, stage) in summary.stages.iter().enumerate() {
        let marker = if stage.skipped {
            style("skip").dim().to_string()
        } else {
            style("run ").green().to_string()
        };
        lines.push(format!(
            "  {:>2}. {} {:<12} {}",
            i + 1,
            marker,
            stage.id.as_str(),
            style(stage.description).dim()
        ));
    }
    lines.join("\n")
}

/// Machine-readable description of a failed validation
pub fn format_validation_error_json(error: &PipelineError) -> String {
    serde_json::json!({
        "valid": false,
        "error": error.to_string(),
        "exit_code": error.exit_code(),
    })
    .to_string()
}
