//! Retry decision taken after every attempt.

use crate::model::AttemptOutcome;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Succeed,
    Retry { delay: Duration },
    Fail,
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// `attempt` is the 1-based ordinal of the attempt that just finished.
    pub fn decide(
        &self,
        outcome: &AttemptOutcome,
        attempt: u32,
        auto_retry: bool,
        stop_requested: bool,
    ) -> Decision {
        if outcome.is_success() {
            return Decision::Succeed;
        }
        if stop_requested || matches!(outcome, AttemptOutcome::Stopped) {
            return Decision::Stop;
        }
        if auto_retry && attempt <= self.max_retries {
            Decision::Retry { delay: self.delay }
        } else {
            Decision::Fail
        }
    }
}
