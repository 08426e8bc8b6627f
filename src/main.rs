mod cli;
mod execute;

use std::process::ExitCode;
use clap::Parser;
use colored::Colorize;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use crate::cli::CLI;

fn main() -> ExitCode {
    let cli = CLI::parse();
    init_tracing(cli.verbose);
    match execute::execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            debug!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise debug with `--verbose` and warnings only without.
fn init_tracing(verbose: bool) {
    let default = if verbose { "toolchest=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
