//! runlocal CLI tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "runlocal")]
#[command(about = "Run CI pipelines locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline
    Run(RunArgs),
    /// Show what a run would execute, without executing anything
    Preview(SelectionArgs),
    /// Check a pipeline definition for authoring errors
    Validate {
        /// Path to the pipeline definition
        #[arg(default_value = "runlocal.json")]
        file: PathBuf,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Print the execution plan instead of running
    #[arg(long)]
    preview: bool,

    /// Ask for confirmation before executing
    #[arg(long)]
    confirm: bool,

    /// Answer yes to any confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,
}

#[derive(Args, Clone)]
struct SelectionArgs {
    /// Path to the pipeline definition
    #[arg(default_value = "runlocal.json")]
    file: PathBuf,

    /// Execution backend
    #[arg(long, value_enum, default_value_t = BackendArg::Container)]
    backend: BackendArg,

    /// Only run this job (repeatable)
    #[arg(long = "job")]
    jobs: Vec<String>,

    /// With --job, also run the selected jobs' dependencies
    #[arg(long)]
    include_deps: bool,

    /// Only run steps with this name or id (repeatable)
    #[arg(long = "step")]
    steps: Vec<String>,

    /// Only run the step at this 1-based position (repeatable)
    #[arg(long = "index")]
    indices: Vec<usize>,

    /// Skip steps with this name or id (repeatable)
    #[arg(long = "skip")]
    skips: Vec<String>,

    /// Skip the step at this 1-based position (repeatable)
    #[arg(long = "skip-index")]
    skip_indices: Vec<usize>,

    /// Variable override as KEY=VALUE, highest precedence (repeatable)
    #[arg(long = "var")]
    vars: Vec<String>,

    /// JSON object file of variables, configuration precedence
    #[arg(long)]
    var_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Container,
    Host,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            commands::run::run(args).await?;
        }
        Commands::Preview(selection) => {
            commands::preview::preview(&selection)?;
        }
        Commands::Validate { file } => {
            commands::validate::validate(&file)?;
        }
    }

    Ok(())
}
