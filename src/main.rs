mod cli;
mod cluster;
mod config;
mod deadline;
mod error;
mod git;
mod helm;
mod proposal;
mod setter;
mod updater;
mod utils;

use clap::Parser;
use cli::Cli;
use colored::Colorize;
use config::Config;
use error::{Result, UpdaterError};
use std::fs::File;
use std::io;
use std::process;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = execute(&cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn execute(cli: &Cli) -> Result<()> {
    let config = Config::from_cli(cli)?;

    let snapshot = if cli.releases.as_os_str() == "-" {
        cluster::load_snapshot(io::stdin().lock())?
    } else {
        let file = File::open(&cli.releases).map_err(|e| {
            UpdaterError::Snapshot(format!(
                "Failed to open '{}': {e}",
                cli.releases.display()
            ))
        })?;
        cluster::load_snapshot(file)?
    };

    let summary = updater::run(&config, &snapshot)?;
    updater::print_summary(&summary);
    summary.into_result()
}
