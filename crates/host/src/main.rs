mod agents;
mod cli;
mod config;
mod failures;
mod log;
mod paths;
mod phases;
mod runner;
mod state;
mod stats;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;

use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::run_command(cli)
}
