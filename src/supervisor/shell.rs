//! Launching one attempt of the supervised command through a shell.

use super::{LineSink, StopSignal};
use crate::error::SupervisorError;
use crate::model::{AttemptOutcome, SupervisorConfig};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Runs a single attempt: spawn, stream lines into `sink`, wait for exit.
///
/// Implementations must return promptly with [`AttemptOutcome::Stopped`] once
/// `stop` fires. An `Err` means the process never started.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    async fn run(
        &self,
        sink: &LineSink,
        stop: &mut StopSignal,
    ) -> Result<AttemptOutcome, SupervisorError>;
}

#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    command: String,
    kill_grace: Duration,
}

impl ShellRunner {
    pub fn new(cfg: &SupervisorConfig) -> Self {
        Self {
            shell: cfg.shell.clone(),
            command: cfg.command.clone(),
            kill_grace: cfg.kill_grace,
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.args(shell_args(&self.shell, &self.command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // Own process group so a stop reaches grandchildren (pnpm -> node).
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[async_trait]
impl AttemptRunner for ShellRunner {
    async fn run(
        &self,
        sink: &LineSink,
        stop: &mut StopSignal,
    ) -> Result<AttemptOutcome, SupervisorError> {
        let spawn_err = |source| SupervisorError::ProcessSpawn {
            command: self.command.clone(),
            source,
        };
        let mut child = self.build_command().spawn().map_err(spawn_err)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("stdout was not captured")))?;
        debug!(pid = ?child.id(), attempt = sink.attempt(), "process spawned");

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => break,
                    Ok(_) => sink.line(decode_line(&buf)),
                    Err(e) => {
                        warn!(error = %e, "reading process output failed");
                        break;
                    }
                },
                _ = stop.requested() => {
                    terminate(&mut child, self.kill_grace).await;
                    return Ok(AttemptOutcome::Stopped);
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = stop.requested() => {
                terminate(&mut child, self.kill_grace).await;
                return Ok(AttemptOutcome::Stopped);
            }
        };
        Ok(match status {
            Ok(status) => match status.code() {
                Some(code) => AttemptOutcome::Exited(code),
                None => AttemptOutcome::Terminated,
            },
            Err(e) => {
                warn!(error = %e, "waiting for process failed");
                AttemptOutcome::Terminated
            }
        })
    }
}

/// Arguments that make `shell` run `command` with stderr folded into stdout.
pub(crate) fn shell_args(shell: &str, command: &str) -> Vec<String> {
    // Split on both separators: a Windows path is still recognised on unix.
    let base = shell.rsplit(['/', '\\']).next().unwrap_or(shell);
    let name = base.to_ascii_lowercase();
    let name = name.strip_suffix(".exe").unwrap_or(&name);
    match name {
        "cmd" => vec!["/C".into(), format!("({command}) 2>&1")],
        "powershell" | "pwsh" => vec![
            "-NoProfile".into(),
            "-Command".into(),
            format!("& {{ {command} }} 2>&1"),
        ],
        _ => vec!["-c".into(), format!("exec 2>&1\n{command}")],
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Ask the process to exit, then kill it if it outlives `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    if let Err(e) = request_termination(child) {
        warn!(pid = ?child.id(), error = %e, "termination request failed");
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "stopped process exited"),
        Ok(Err(e)) => warn!(error = %e, "waiting for stopped process failed"),
        Err(_) => {
            warn!(
                grace = %humantime::format_duration(grace),
                "process ignored termination request, killing"
            );
            if let Err(e) = force_kill(child) {
                warn!(error = %e, "kill failed");
            }
            if let Err(e) = child.wait().await {
                warn!(error = %e, "waiting for killed process failed");
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    // Already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    killpg(Pid::from_raw(pid as i32), signal).map_err(std::io::Error::from)
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    signal_group(child, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
fn force_kill(child: &mut Child) -> std::io::Result<()> {
    signal_group(child, nix::sys::signal::Signal::SIGKILL).or_else(|_| child.start_kill())
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
