mod commands;
mod config;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "materialize", about = "Spatial-lookup materialization pipeline")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs the full ingest workflow for one annotation table (spec.md §4.7).
    RunIngest(commands::run_ingest::Config),

    /// Scans a segmentation table for rows with a missing root ID and
    /// repairs them (spec.md §4.9).
    RunRepair(commands::run_repair::Config),

    /// Prints the checkpoint record for a table (spec.md §4.2 `get`).
    InspectCheckpoint(commands::inspect_checkpoint::Config),
}

#[tokio::main]
async fn main() -> Result<(), commands::Error> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Command::RunIngest(config) => commands::run_ingest::command(config).await,
        Command::RunRepair(config) => commands::run_repair::command(config).await,
        Command::InspectCheckpoint(config) => commands::inspect_checkpoint::command(config).await,
    }
}
