//! Run lifecycle controller.
//!
//! Relays start/stop/auto-retry commands from presentation layers into the
//! supervisor and reports refusals back as info events.

use crate::error::SupervisorError;
use crate::model::{Phase, SupervisorEvent};
use crate::supervisor::Supervisor;
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tracing::debug;

/// Commands emitted by UI layers to control the supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UiCommand {
    Start,
    Stop,
    SetAutoRetry(bool),
    Quit,
}

/// Drive the supervisor from UI commands until `Quit` (or the UI goes away).
pub(crate) async fn run_controller(
    supervisor: &Supervisor,
    start_on_launch: bool,
    event_tx: UnboundedSender<SupervisorEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    // A start issued while the previous process is still dying is held here and
    // replayed once the old worker is gone, so two invocations never overlap.
    let mut start_pending = false;
    if start_on_launch {
        start_pending = start(supervisor, &event_tx);
    }

    loop {
        let cmd = tokio::select! {
            cmd = cmd_rx.recv() => cmd,
            _ = supervisor.idle(), if start_pending => {
                start_pending = start(supervisor, &event_tx);
                continue;
            }
        };
        match cmd {
            Some(UiCommand::Start) => start_pending = start(supervisor, &event_tx),
            Some(UiCommand::Stop) => {
                if start_pending {
                    start_pending = false;
                    let _ = event_tx.send(SupervisorEvent::Info("Pending start cancelled".into()));
                } else if supervisor.snapshot().phase != Phase::Running {
                    let _ = event_tx.send(SupervisorEvent::Info("Nothing to stop".into()));
                } else {
                    supervisor.stop();
                    let _ = event_tx.send(SupervisorEvent::Info("Stopping…".into()));
                }
            }
            Some(UiCommand::SetAutoRetry(enabled)) => {
                supervisor.set_auto_retry(enabled);
                let msg = if enabled {
                    "Auto-retry enabled"
                } else {
                    "Auto-retry disabled"
                };
                let _ = event_tx.send(SupervisorEvent::Info(msg.into()));
            }
            // Quit waits for the worker so the child process is gone before we exit.
            Some(UiCommand::Quit) | None => break,
        }
    }

    shutdown(supervisor, &event_tx).await;
    Ok(())
}

/// Returns true when the start has to wait for the previous worker.
fn start(supervisor: &Supervisor, event_tx: &UnboundedSender<SupervisorEvent>) -> bool {
    match supervisor.start() {
        Ok(()) => {
            let _ = event_tx.send(SupervisorEvent::Info("Starting…".into()));
            false
        }
        Err(SupervisorError::StillStopping) => {
            let _ = event_tx.send(SupervisorEvent::Info(
                "Waiting for the previous run to stop…".into(),
            ));
            true
        }
        Err(e) => {
            debug!(error = %e, "start refused");
            let _ = event_tx.send(SupervisorEvent::Info(format!("Start ignored: {e}")));
            false
        }
    }
}

async fn shutdown(supervisor: &Supervisor, event_tx: &UnboundedSender<SupervisorEvent>) {
    supervisor.stop();
    // Cancel watchdog: if termination takes too long, keep UI feedback alive.
    let mut watchdog = tokio::time::interval(Duration::from_secs(3));
    watchdog.tick().await;
    let wait = supervisor.wait();
    tokio::pin!(wait);
    loop {
        tokio::select! {
            _ = &mut wait => break,
            _ = watchdog.tick() => {
                let _ = event_tx.send(SupervisorEvent::Info("Still stopping…".into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SupervisorConfig;
    use crate::supervisor::ShellRunner;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn supervisor_with(
        cfg: SupervisorConfig,
    ) -> (
        Supervisor,
        UnboundedSender<SupervisorEvent>,
        UnboundedReceiver<SupervisorEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Arc::new(ShellRunner::new(&cfg));
        (Supervisor::new(cfg, runner, tx.clone()), tx, rx)
    }

    fn infos(rx: &mut UnboundedReceiver<SupervisorEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let SupervisorEvent::Info(msg) = ev {
                out.push(msg);
            }
        }
        out
    }

    #[tokio::test]
    async fn closed_command_channel_quits_without_starting() {
        let (sup, tx, mut rx) = supervisor_with(SupervisorConfig::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        drop(cmd_tx);

        run_controller(&sup, false, tx, cmd_rx).await.unwrap();
        assert_eq!(sup.snapshot().phase, Phase::Idle);
        assert!(infos(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn stop_when_idle_is_reported() {
        let (sup, tx, mut rx) = supervisor_with(SupervisorConfig::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx.send(UiCommand::Stop).unwrap();
        cmd_tx.send(UiCommand::SetAutoRetry(false)).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();

        run_controller(&sup, false, tx, cmd_rx).await.unwrap();
        assert!(!sup.snapshot().auto_retry);
        assert_eq!(
            infos(&mut rx),
            vec!["Nothing to stop".to_string(), "Auto-retry disabled".to_string()]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quit_stops_the_running_process() {
        let cfg = SupervisorConfig {
            command: "sleep 30".into(),
            shell: "sh".into(),
            kill_grace: Duration::from_millis(200),
            ..SupervisorConfig::default()
        };
        let (sup, tx, mut rx) = supervisor_with(cfg);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx.send(UiCommand::Start).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            run_controller(&sup, true, tx, cmd_rx),
        )
        .await
        .expect("quit should not hang")
        .unwrap();

        assert_eq!(sup.snapshot().phase, Phase::Stopped);
        let messages = infos(&mut rx);
        assert_eq!(messages[0], "Starting…");
        assert!(messages[1].starts_with("Start ignored: a run is already in progress"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_waits_until_the_old_process_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let cfg = SupervisorConfig {
            // Ignores SIGTERM, so only the SIGKILL after the grace period ends it.
            command: format!(
                "if [ -f {pid} ] && kill -0 \"$(cat {pid})\" 2>/dev/null; then echo OVERLAP; fi\n\
                 echo $$ > {pid}\n\
                 trap '' TERM\n\
                 echo up\n\
                 sleep 30",
                pid = pid_file.display()
            ),
            shell: "sh".into(),
            kill_grace: Duration::from_millis(300),
            ..SupervisorConfig::default()
        };
        let (sup, tx, mut rx) = supervisor_with(cfg);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let drive = async {
            let mut seen = Vec::new();
            let mut ups = 0;
            cmd_tx.send(UiCommand::Start).unwrap();
            while let Some(ev) = rx.recv().await {
                match ev {
                    SupervisorEvent::Line(l) if l.text == "up" => {
                        ups += 1;
                        if ups == 1 {
                            cmd_tx.send(UiCommand::Stop).unwrap();
                            cmd_tx.send(UiCommand::Start).unwrap();
                        } else {
                            cmd_tx.send(UiCommand::Quit).unwrap();
                            break;
                        }
                    }
                    SupervisorEvent::Line(l) => seen.push(l.text),
                    SupervisorEvent::Info(msg) => seen.push(msg),
                    _ => {}
                }
            }
            seen
        };

        let (res, seen) = tokio::time::timeout(
            Duration::from_secs(10),
            async { tokio::join!(run_controller(&sup, false, tx, cmd_rx), drive) },
        )
        .await
        .expect("restart should not hang");
        res.unwrap();

        assert!(!seen.iter().any(|l| l == "OVERLAP"));
        assert!(seen
            .iter()
            .any(|l| l == "Waiting for the previous run to stop…"));
        assert_eq!(sup.snapshot().phase, Phase::Stopped);
    }
}
