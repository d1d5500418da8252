//! Supervised execution of one external command with bounded retry.
//!
//! A [`Supervisor`] owns the lifecycle state of the current run. `start()`
//! spawns a worker task that owns the whole attempt loop (spawn, stream lines,
//! wait, decide, delay) and reports everything through an unbounded event
//! channel, so presentation layers never share mutable state with the worker.

mod policy;
mod shell;

pub use shell::{AttemptRunner, ShellRunner};

use policy::{Decision, RetryPolicy};

use crate::error::SupervisorError;
use crate::model::{
    now_rfc3339, AttemptOutcome, LineSource, OutputLine, Phase, RunAttempt, SupervisorConfig,
    SupervisorEvent, SupervisorState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Fires once `Supervisor::stop` is called for the run it belongs to.
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves when a stop is requested. A dropped supervisor counts as a stop.
    pub async fn requested(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

struct Shared {
    state: SupervisorState,
    attempts: Vec<RunAttempt>,
}

struct Inner {
    shared: Mutex<Shared>,
    auto_retry: AtomicBool,
    policy: RetryPolicy,
    runner: Arc<dyn AttemptRunner>,
    event_tx: UnboundedSender<SupervisorEvent>,
    /// True from `start()` until the worker, and with it the child, is gone.
    busy: watch::Sender<bool>,
}

/// Clears `busy` when the worker future is dropped, finished or not.
struct WorkerGuard(Arc<Inner>);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.busy.send_replace(false);
    }
}

struct RunHandle {
    stop_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

pub struct Supervisor {
    inner: Arc<Inner>,
    run: Mutex<Option<RunHandle>>,
}

/// Where an attempt's output goes: the attempt record and the event channel.
pub struct LineSink {
    inner: Arc<Inner>,
    run_id: u64,
    attempt: u32,
}

impl LineSink {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forward one line produced by the external process.
    pub fn line(&self, text: String) {
        self.push(text, LineSource::Process);
    }

    fn marker(&self, text: impl Into<String>) {
        self.push(text.into(), LineSource::Supervisor);
    }

    fn push(&self, text: String, source: LineSource) {
        let mut shared = self.inner.lock();
        // Output of a superseded run is dropped so runs never interleave.
        if shared.state.run_id != self.run_id {
            return;
        }
        if source == LineSource::Process {
            if let Some(record) = shared.attempts.last_mut() {
                record.lines.push(text.clone());
            }
        }
        // Sent under the lock so line order matches record order.
        let _ = self.inner.event_tx.send(SupervisorEvent::Line(OutputLine {
            attempt: self.attempt,
            text,
            source,
        }));
    }
}

impl Supervisor {
    pub fn new(
        cfg: SupervisorConfig,
        runner: Arc<dyn AttemptRunner>,
        event_tx: UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let inner = Inner {
            shared: Mutex::new(Shared {
                state: SupervisorState::new(&cfg),
                attempts: Vec::new(),
            }),
            auto_retry: AtomicBool::new(cfg.auto_retry),
            policy: RetryPolicy {
                max_retries: cfg.max_retries,
                delay: cfg.retry_delay,
            },
            runner,
            event_tx,
            busy: watch::channel(false).0,
        };
        Self {
            inner: Arc::new(inner),
            run: Mutex::new(None),
        }
    }

    /// Begin a new run at attempt 1. Must be called inside a Tokio runtime.
    ///
    /// Refused while the previous worker is still terminating its process,
    /// so two invocations never overlap. See [`Supervisor::idle`].
    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut run = self.run_slot();
        let run_id = {
            let mut shared = self.inner.lock();
            if shared.state.phase == Phase::Running {
                return Err(SupervisorError::AlreadyRunning);
            }
            if *self.inner.busy.borrow() {
                return Err(SupervisorError::StillStopping);
            }
            self.inner.busy.send_replace(true);
            shared.state.phase = Phase::Running;
            shared.state.attempts_made = 0;
            shared.state.auto_retry = self.inner.auto_retry.load(Ordering::Relaxed);
            shared.state.run_id += 1;
            shared.attempts.clear();
            self.inner.publish(&shared.state);
            shared.state.run_id
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let guard = WorkerGuard(self.inner.clone());
        let worker = tokio::spawn(async move {
            let _guard = guard;
            inner.run_attempts(run_id, StopSignal(stop_rx)).await
        });
        *run = Some(RunHandle {
            stop_tx,
            worker: Some(worker),
        });
        info!(run_id, "run started");
        Ok(())
    }

    /// Stop the current run and terminate its process. No-op unless running.
    pub fn stop(&self) {
        let run = self.run_slot();
        {
            let mut shared = self.inner.lock();
            if shared.state.phase != Phase::Running {
                return;
            }
            shared.state.phase = Phase::Stopped;
            self.inner.publish(&shared.state);
            info!(run_id = shared.state.run_id, "stop requested");
        }
        if let Some(handle) = run.as_ref() {
            handle.stop_tx.send_replace(true);
        }
    }

    pub fn set_auto_retry(&self, enabled: bool) {
        self.inner.auto_retry.store(enabled, Ordering::Relaxed);
        let mut shared = self.inner.lock();
        if shared.state.auto_retry != enabled {
            shared.state.auto_retry = enabled;
            self.inner.publish(&shared.state);
        }
    }

    pub fn snapshot(&self) -> SupervisorState {
        self.inner.lock().state.clone()
    }

    pub fn attempts(&self) -> Vec<RunAttempt> {
        self.inner.lock().attempts.clone()
    }

    /// Wait for the current run's worker to finish and return the final state.
    pub async fn wait(&self) -> SupervisorState {
        let worker = {
            let mut run = self.run_slot();
            run.as_mut().and_then(|h| h.worker.take())
        };
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "supervisor worker aborted");
            }
        }
        self.snapshot()
    }

    /// Resolves once no worker is alive, i.e. `start()` will not be refused
    /// with [`SupervisorError::StillStopping`].
    pub async fn idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    fn run_slot(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SupervisorState) {
        let _ = self
            .event_tx
            .send(SupervisorEvent::StateChanged(state.clone()));
    }

    async fn run_attempts(self: Arc<Self>, run_id: u64, mut stop: StopSignal) {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let Some(sink) = self.begin_attempt(run_id, attempt) else {
                break;
            };

            let outcome = match self.runner.run(&sink, &mut stop).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(run_id, attempt, error = %err, "attempt did not start");
                    sink.marker(format!("--- Error: {err} ---"));
                    AttemptOutcome::SpawnFailed(err.to_string())
                }
            };
            self.finish_attempt(&sink, &outcome);

            let auto_retry = self.auto_retry.load(Ordering::Relaxed);
            match self
                .policy
                .decide(&outcome, attempt, auto_retry, stop.is_requested())
            {
                Decision::Succeed => {
                    self.conclude(run_id, Phase::Succeeded);
                    break;
                }
                Decision::Fail => {
                    let err = SupervisorError::RetriesExhausted { attempts: attempt };
                    sink.marker(format!("--- {} ---", capitalize(&err.to_string())));
                    self.conclude(run_id, Phase::Failed);
                    break;
                }
                Decision::Stop => {
                    sink.marker("--- Stopped ---");
                    self.conclude(run_id, Phase::Stopped);
                    break;
                }
                Decision::Retry { delay } => {
                    sink.marker(format!(
                        "Auto-retrying in {}... ({}/{})",
                        humantime::format_duration(delay),
                        attempt,
                        self.policy.max_retries
                    ));
                    let _ = self
                        .event_tx
                        .send(SupervisorEvent::RetryScheduled { attempt, delay });
                    info!(run_id, attempt, ?delay, "retry scheduled");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.requested() => {
                            sink.marker("--- Stopped ---");
                            self.conclude(run_id, Phase::Stopped);
                            break;
                        }
                    }
                }
            }
        }
    }

    fn begin_attempt(self: &Arc<Self>, run_id: u64, attempt: u32) -> Option<LineSink> {
        let (command, max_attempts) = {
            let mut shared = self.lock();
            let state = &mut shared.state;
            if state.run_id != run_id
                || state.phase != Phase::Running
                || attempt > state.max_attempts()
            {
                return None;
            }
            state.attempts_made = attempt;
            let snapshot = state.clone();
            shared.attempts.push(RunAttempt {
                index: attempt,
                outcome: None,
                lines: Vec::new(),
                started_at: now_rfc3339(),
                finished_at: None,
            });
            self.publish(&snapshot);
            let max_attempts = snapshot.max_attempts();
            (snapshot.command, max_attempts)
        };

        info!(run_id, attempt, max_attempts, "attempt started");
        let sink = LineSink {
            inner: self.clone(),
            run_id,
            attempt,
        };
        sink.marker(format!(
            "--- Starting {command} (attempt {attempt}/{max_attempts}) ---"
        ));
        Some(sink)
    }

    fn finish_attempt(&self, sink: &LineSink, outcome: &AttemptOutcome) {
        {
            let mut shared = self.lock();
            if shared.state.run_id != sink.run_id {
                return;
            }
            if let Some(record) = shared.attempts.last_mut() {
                record.outcome = Some(outcome.clone());
                record.finished_at = Some(now_rfc3339());
            }
        }

        match outcome {
            AttemptOutcome::Exited(0) => {
                info!(attempt = sink.attempt, "process completed successfully");
                sink.marker("--- Process completed successfully ---");
            }
            AttemptOutcome::Exited(code) => {
                let err = SupervisorError::NonZeroExit { code: *code };
                warn!(attempt = sink.attempt, error = %err, "attempt failed");
                sink.marker(format!("--- {} ---", capitalize(&err.to_string())));
            }
            AttemptOutcome::Terminated => {
                warn!(attempt = sink.attempt, "process terminated by signal");
                sink.marker("--- Process terminated by signal ---");
            }
            AttemptOutcome::SpawnFailed(_) | AttemptOutcome::Stopped => {}
        }
        let _ = self.event_tx.send(SupervisorEvent::AttemptFinished {
            attempt: sink.attempt,
            outcome: outcome.clone(),
        });
    }

    /// Enter a terminal phase unless a stop or a newer run got there first.
    fn conclude(&self, run_id: u64, phase: Phase) {
        let mut shared = self.lock();
        if shared.state.run_id != run_id || shared.state.phase != Phase::Running {
            return;
        }
        shared.state.phase = phase;
        self.publish(&shared.state);
        info!(run_id, ?phase, attempts = shared.state.attempts_made, "run finished");
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
