//! Burrow CLI
//!
//! Entry point of broker child processes (`burrow serve`), plus a few
//! commands for poking at namespaces by hand.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod cli;
mod commands;

use cli::Cli;

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Setup logging based on verbosity, RUST_LOG taking precedence
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Namespace changes of the whole process must happen while it is still
    // single-threaded, so before the runtime starts.
    bootstrap::run();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {e}");
            process::exit(1);
        }
    };

    // Execute the command
    if let Err(e) = runtime.block_on(commands::dispatch(cli.command)) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
