//! Autoglue daemon runner. Run as a command-line tool.

use autoglue::daemon::RunCommand;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
#[command(about)]
pub enum Command {
    Run(RunCommand),
}

impl Command {
    async fn run(self) -> miette::Result<()> {
        match self {
            Command::Run(run_cmd) => autoglue::daemon::run(run_cmd).await,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli_args = Args::parse();

    if let Err(e) = cli_args.command.run().await {
        eprintln!("Failed to run `run` command:\n{e:?}");
    }
}
