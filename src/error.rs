//! Error taxonomy for supervised runs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("failed to launch `{command}`: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process failed with exit code {code}")]
    NonZeroExit { code: i32 },

    #[error("the previous run is still shutting down")]
    StillStopping,

    #[error("giving up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("run stopped")]
    Stopped,
}
