//! Shuttle CLI
//!
//! Starts the orchestration daemon in the foreground, reports its state and
//! asks it to stop.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use shuttle_cli::daemon_cmd::{self, StartArgs, StopArgs};
use shuttle_cli::status_cmd;
use shuttle_core::paths::WorkspacePaths;

#[derive(Parser, Debug)]
#[command(name = "shuttle")]
#[command(version, about = "Autonomous issue orchestration daemon", long_about = None)]
struct Cli {
    /// Workspace (repository checkout) the daemon manages
    #[arg(long, global = true, default_value = ".", env = "SHUTTLE_WORKSPACE")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground until stopped.
    Start(StartArgs),

    /// Show daemon state, pid liveness and pending signals.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask a running daemon to drain and stop.
    Stop(StopArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = WorkspacePaths::new(&cli.workspace);

    match cli.command {
        Command::Start(args) => daemon_cmd::run_start(&paths, &args).await,
        Command::Status { json } => status_cmd::run(&paths, json),
        Command::Stop(args) => daemon_cmd::run_stop(&paths, &args).await,
    }
}
