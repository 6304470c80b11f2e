//! `maestro` CLI: run one orchestration from a config file.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use maestro::core::types::RunOptions;
use maestro::exit_codes;
use maestro::io::console::Console;
use maestro::io::transport::HttpTransport;
use maestro::logging;
use maestro::looping::{FirstCallFailed, LoopStop, run_loop};
use maestro::start::{build_gateway, prepare_run};

#[derive(Parser)]
#[command(
    name = "maestro",
    version,
    about = "Drive a language model through a sandboxed file-reading loop"
)]
struct Cli {
    /// Config file (TOML, YAML or JSON).
    config: PathBuf,
    /// Echo sent (`>>`) and received (`<<`) message bodies.
    #[arg(short = 'm', long)]
    show_messages: bool,
    /// Echo the model's memory after each reply.
    #[arg(short = 'M', long)]
    show_memory: bool,
    /// Append diagnostics to this file instead of stderr.
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.log_file.as_deref()) {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::INVALID);
    }
    match run(&cli) {
        Ok(()) => std::process::exit(exit_codes::OK),
        Err(err) => {
            eprintln!("{err:#}");
            let code = if err.downcast_ref::<FirstCallFailed>().is_some() {
                exit_codes::MODEL_UNAVAILABLE
            } else {
                exit_codes::INVALID
            };
            std::process::exit(code);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let options = RunOptions {
        show_messages: cli.show_messages,
        show_memory: cli.show_memory,
    };
    let console = Console::new(options);
    let ctx = prepare_run(&cli.config)?;
    let gateway = build_gateway(&ctx, HttpTransport::new()?, console);

    let outcome = run_loop(&ctx, &gateway, &console)?;
    match &outcome.stop {
        LoopStop::Finalized { report: Some(path) } => {
            info!(path = %path.display(), "report saved");
        }
        LoopStop::Finalized { report: None } => warn!("finalized without saving a report"),
        LoopStop::RequestBudgetExhausted => info!("request budget exhausted"),
        LoopStop::ModelDone => info!("model reported done"),
        LoopStop::StepCeiling => warn!("stopped at the step ceiling"),
    }

    if let Some(report) = &ctx.report_path {
        if report.exists() {
            info!(path = %report.display(), "configured report file exists");
        } else {
            warn!(path = %report.display(), "configured report file was not written");
        }
    }
    info!(
        requests = outcome.requests_made,
        steps = outcome.total_steps,
        "run complete"
    );
    Ok(())
}
