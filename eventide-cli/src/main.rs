//! Eventide CLI - command-line interface
//!
//! Runs the session engine against a configuration and writes the resulting
//! event log to the console or to per-topic files.

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "eventide")]
#[command(about = "Synthetic event logs for a streaming-media service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::handle_command(cli.command).await
}
