use crate::error::SupervisorError;
use crate::model::{LineSource, Phase, RunSummary, SupervisorConfig, SupervisorEvent};
use crate::supervisor::{ShellRunner, Supervisor};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum WriterLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<WriterLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriterLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                WriterLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                WriterLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "retry-runner",
    version,
    about = "Run a build/run command, retry it on failure and watch its output"
)]
pub struct Cli {
    /// Command to supervise (run through the shell)
    #[arg(long, short = 'c', default_value = "pnpm run run")]
    pub command: String,

    /// Shell used to run the command (`sh`/`bash` take -c, `cmd` takes /C, `powershell` takes -Command)
    #[arg(long, default_value = crate::model::default_shell())]
    pub shell: String,

    /// Retries after the first failed attempt
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    /// Pause between a failed attempt and the next one
    #[arg(long, default_value = "3s")]
    pub retry_delay: humantime::Duration,

    /// Use --auto-retry true or --auto-retry false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_retry: bool,

    /// How long a stopped process may take to exit before it is killed
    #[arg(long, default_value = "5s")]
    pub kill_grace: humantime::Duration,

    /// How often the TUI drains new output and redraws
    #[arg(long, default_value = "100ms")]
    pub poll_interval: humantime::Duration,

    /// Output lines kept in the TUI log
    #[arg(long, default_value_t = 10_000)]
    pub scrollback: usize,

    /// Start the first run as soon as the app launches
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub start_on_launch: bool,

    /// Print output as plain text and exit when the run ends (no TUI)
    #[arg(long, conflicts_with = "json")]
    pub text: bool,

    /// Print a JSON run summary and exit when the run ends (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Append diagnostic logs to this file
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

impl Cli {
    pub fn is_headless(&self) -> bool {
        self.text || self.json || cfg!(not(feature = "tui"))
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if !args.is_headless() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
    }

    run_text(args).await
}

/// Build a `SupervisorConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<SupervisorConfig> {
    let command = args.command.trim();
    if command.is_empty() {
        anyhow::bail!("--command must not be empty");
    }
    if args.shell.trim().is_empty() {
        anyhow::bail!("--shell must not be empty");
    }
    Ok(SupervisorConfig {
        command: command.to_string(),
        shell: args.shell.clone(),
        max_retries: args.max_retries,
        retry_delay: Duration::from(args.retry_delay),
        auto_retry: args.auto_retry,
        kill_grace: Duration::from(args.kill_grace),
    })
}

/// Headless mode: stream output, stop on Ctrl-C, print a summary at the end.
async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<SupervisorEvent>();

    let runner = Arc::new(ShellRunner::new(&cfg));
    let supervisor = Supervisor::new(cfg, runner, evt_tx);
    supervisor.start().context("start supervised run")?;

    let wait = supervisor.wait();
    tokio::pin!(wait);
    let state = loop {
        tokio::select! {
            Some(ev) = evt_rx.recv() => forward_event(&out_tx, ev, args.json),
            res = tokio::signal::ctrl_c() => {
                if res.is_ok() {
                    let _ = out_tx.send(WriterLine::Stderr("Stopping…".into()));
                    supervisor.stop();
                }
            }
            state = &mut wait => break state,
        }
    };
    // The worker is done; whatever it sent is already queued.
    while let Ok(ev) = evt_rx.try_recv() {
        forward_event(&out_tx, ev, args.json);
    }

    let summary = RunSummary::from_parts(&state, &supervisor.attempts());
    if args.json {
        let out = serde_json::to_string_pretty(&summary)?;
        let _ = out_tx.send(WriterLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&summary).lines {
            let _ = out_tx.send(WriterLine::Stderr(line));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;

    match state.phase {
        Phase::Succeeded => Ok(()),
        Phase::Stopped => Err(SupervisorError::Stopped.into()),
        _ => Err(SupervisorError::RetriesExhausted {
            attempts: state.attempts_made,
        }
        .into()),
    }
}

/// Route one supervisor event to the writer. JSON mode keeps stdout for the summary.
fn forward_event(out_tx: &mpsc::UnboundedSender<WriterLine>, ev: SupervisorEvent, json: bool) {
    if let SupervisorEvent::Line(line) = ev {
        let routed = match (line.source, json) {
            (LineSource::Process, false) => WriterLine::Stdout(line.text),
            _ => WriterLine::Stderr(line.text),
        };
        let _ = out_tx.send(routed);
    }
}
