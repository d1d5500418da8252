mod cli;
mod error;
mod logging;
mod model;
mod orchestrator;
mod supervisor;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init(&args)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), command = %args.command, "retry-runner starting");

    cli::run(args).await
}
