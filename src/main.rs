use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use tasklane::config::Config;
use tasklane::source::FileTaskSource;
use tasklane::{OrchestrationContext, Orchestrator, Result};

/// Tasklane - capability-aware task coordination for worker pools
#[derive(Parser, Debug)]
#[command(name = "tasklane")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKLANE_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.tasklane/tasklane.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (defaults to ~/.tasklane/tasklane.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Add the tasks from a TOML or JSON batch file to the stored backlog
    Import {
        /// Batch file with a `tasks` array
        file: PathBuf,
    },

    /// Detect overlapping tasks and print the proposed resolutions
    Analyze {
        /// Apply dependency and sequencing resolutions to the stored state
        #[arg(long)]
        apply: bool,
    },

    /// Print tasks, workers and counters as JSON
    Status,

    /// Run one liveness pass, reclaiming tasks from silent workers
    Sweep,
}

#[derive(Serialize)]
struct AnalysisOutput {
    overlaps: Vec<tasklane::orchestration::OverlapRecord>,
    resolutions: Vec<tasklane::orchestration::Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<Vec<tasklane::orchestration::AppliedChange>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tasklane::log::init(cli.debug)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let orchestrator = Orchestrator::new(OrchestrationContext::with_state_file(config)?);
        orchestrator.restore().await?;

        match cli.command {
            Command::Import { file } => run_import(&orchestrator, file).await,
            Command::Analyze { apply } => run_analyze(&orchestrator, apply).await,
            Command::Status => run_status(&orchestrator).await,
            Command::Sweep => run_sweep(&orchestrator).await,
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_import(orchestrator: &Orchestrator, file: PathBuf) -> Result<()> {
    tracing::info!(file = %file.display(), "Import command");
    let report = orchestrator.ingest(FileTaskSource::new(&file)).await?;
    print_json(&report)
}

async fn run_analyze(orchestrator: &Orchestrator, apply: bool) -> Result<()> {
    tracing::info!(apply, "Analyze command");
    let overlaps = orchestrator.analyze_conflicts().await;
    let resolutions = orchestrator.resolve_conflicts(&overlaps).await;
    let applied = if apply {
        Some(orchestrator.apply_resolutions(&resolutions).await)
    } else {
        None
    };
    print_json(&AnalysisOutput {
        overlaps,
        resolutions,
        applied,
    })
}

async fn run_status(orchestrator: &Orchestrator) -> Result<()> {
    tracing::info!("Status command");
    print_json(&orchestrator.get_system_status().await)
}

async fn run_sweep(orchestrator: &Orchestrator) -> Result<()> {
    tracing::info!("Sweep command");
    print_json(&orchestrator.sweep().await)
}
