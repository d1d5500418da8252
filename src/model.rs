use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Command line handed to the shell for every attempt.
    pub command: String,
    /// Shell program used to interpret `command` (`sh -c` / `cmd /C`).
    pub shell: String,
    /// Retries after the first attempt; total attempts never exceed `max_retries + 1`.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub auto_retry: bool,
    /// How long a stopped process gets to exit before it is killed.
    #[serde(with = "humantime_serde")]
    pub kill_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            command: "pnpm run run".into(),
            shell: default_shell().into(),
            max_retries: 5,
            retry_delay: Duration::from_secs(3),
            auto_retry: true,
            kill_grace: Duration::from_secs(5),
        }
    }
}

pub fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "sh"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Running => "Running",
            Phase::Succeeded => "Completed successfully",
            Phase::Failed => "Failed",
            Phase::Stopped => "Stopped",
        }
    }
}

/// Point-in-time copy of the supervisor's lifecycle counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorState {
    pub phase: Phase,
    pub attempts_made: u32,
    pub max_retries: u32,
    pub auto_retry: bool,
    pub command: String,
    /// Bumped on every `start()`; workers of older runs leave newer runs alone.
    pub run_id: u64,
}

impl SupervisorState {
    pub fn new(cfg: &SupervisorConfig) -> Self {
        Self {
            phase: Phase::Idle,
            attempts_made: 0,
            max_retries: cfg.max_retries,
            auto_retry: cfg.auto_retry,
            command: cfg.command.clone(),
            run_id: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Failed attempts that triggered (or could have triggered) a retry.
    pub fn retries_used(&self) -> u32 {
        self.attempts_made.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Exited(i32),
    /// Killed by a signal; no exit code available.
    Terminated,
    SpawnFailed(String),
    /// Terminated because a stop was requested.
    Stopped,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Exited(0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAttempt {
    pub index: u32,
    pub outcome: Option<AttemptOutcome>,
    pub lines: Vec<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSource {
    Process,
    Supervisor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub attempt: u32,
    pub text: String,
    pub source: LineSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorEvent {
    StateChanged(SupervisorState),
    Line(OutputLine),
    AttemptFinished {
        attempt: u32,
        outcome: AttemptOutcome,
    },
    RetryScheduled {
        attempt: u32,
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    Info(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub index: u32,
    pub outcome: Option<AttemptOutcome>,
    pub line_count: usize,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// Final report of a run, printed by the headless modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub command: String,
    pub phase: Phase,
    pub attempts_made: u32,
    pub max_retries: u32,
    pub attempts: Vec<AttemptSummary>,
}

impl RunSummary {
    pub fn from_parts(state: &SupervisorState, attempts: &[RunAttempt]) -> Self {
        Self {
            command: state.command.clone(),
            phase: state.phase,
            attempts_made: state.attempts_made,
            max_retries: state.max_retries,
            attempts: attempts
                .iter()
                .map(|a| AttemptSummary {
                    index: a.index,
                    outcome: a.outcome.clone(),
                    line_count: a.lines.len(),
                    started_at: a.started_at.clone(),
                    finished_at: a.finished_at.clone(),
                })
                .collect(),
        }
    }
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
