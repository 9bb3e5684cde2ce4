//! graphflow command-line entry point.
//!
//! Binary name: `graphflow`
//!
//! Parses CLI arguments, installs tracing, then dispatches to the command
//! handler.

mod cli;

use clap::Parser;
use graphflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions {
        enable_otel: cli.otel,
        default_filter: TracingOptions::filter_for_verbosity(cli.verbose).to_string(),
        json: false,
    };
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Validate { file } => cli::validate::handle_validate(&file, cli.json).await,
        Commands::Run(args) => cli::run::handle_run(args, cli.json).await,
    };

    shutdown_tracing();
    result
}
