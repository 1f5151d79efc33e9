use anyhow::{Context, Result};
use nanopipe::cli::commands::{RunCommand, ValidateCommand};
use nanopipe::cli::output::*;
use nanopipe::cli::{Cli, Command};
use nanopipe::core::{ConfigStore, StartAt};
use nanopipe::execution::{prepare, PipelineOrchestrator, ProcessRunner, RunOptions};
use nanopipe::LogOptions;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Console logging outside of a run; each run adds its own file sink
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand, verbose: bool) -> Result<()> {
    if !cmd.quiet {
        println!(
            "{} Loading configuration {}",
            INFO,
            style(cmd.config.display()).bold()
        );
        for (key, value) in &cmd.overrides {
            println!(
                "{} Override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }

    let mut orchestrator = PipelineOrchestrator::new(ProcessRunner::new());
    if !cmd.quiet {
        orchestrator.add_event_handler(|event| println!("{}", format_execution_event(event)));
    }

    let options = RunOptions {
        overrides: cmd.overrides.clone(),
        start: cmd.start(),
        log: LogOptions {
            console: verbose,
            verbose,
        },
    };

    match orchestrator.run(&cmd.config, &options).await {
        Ok(report) => {
            println!("\n{}", format_run_report(&report));
            Ok(())
        }
        Err(e) => {
            println!("\n{} Pipeline {}", CROSS, style("failed").red());
            error!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    if !cmd.json {
        println!("{} Validating configuration...", INFO);
    }

    let result = ConfigStore::new(&cmd.config).load().and_then(|mut config| {
        prepare(&mut config, StartAt::Beginning).map(|plan| (config, plan))
    });

    match result {
        Ok((config, plan)) => {
            let summary = plan.pipeline.summary(plan.start);
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!("{} Configuration is valid!", CHECK);
            println!("  Output base: {}", style(plan.output.display()).bold());
            let threads = config.get_str("threads").unwrap_or_default();
            if plan.threads_derived {
                println!("  Threads: {} {}", style(threads).cyan(), style("(detected)").dim());
            } else {
                println!("  Threads: {}", style(threads).cyan());
            }
            println!("{}", format_plan(&summary));
            Ok(())
        }
        Err(e) if cmd.json => {
            println!("{}", format_validation_error_json(&e));
            std::process::exit(e.exit_code());
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(&e).red());
            std::process::exit(e.exit_code());
        }
    }
}
