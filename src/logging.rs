//! Diagnostic logging setup.
//!
//! The TUI owns the terminal, so it only logs when `--log-file` is given.
//! Headless modes log warnings to stderr unless `RUST_LOG` says otherwise.

use crate::cli::Cli;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub fn init(args: &Cli) -> Result<()> {
    let default_level = if args.log_file.is_some() { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    let installed = if let Some(path) = args.log_file.as_deref() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    } else if args.is_headless() {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        return Ok(());
    };
    installed.map_err(|e| anyhow::anyhow!("install log subscriber: {e}"))
}
