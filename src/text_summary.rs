//! Text summary builder for headless output.
//!
//! Formats the final state of a run as human-readable lines.

use crate::model::{AttemptOutcome, Phase, RunSummary};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn describe_outcome(outcome: Option<&AttemptOutcome>) -> String {
    match outcome {
        None => "running".into(),
        Some(AttemptOutcome::Exited(0)) => "succeeded".into(),
        Some(AttemptOutcome::Exited(code)) => format!("exit code {code}"),
        Some(AttemptOutcome::Terminated) => "terminated by signal".into(),
        Some(AttemptOutcome::SpawnFailed(err)) => format!("could not start ({err})"),
        Some(AttemptOutcome::Stopped) => "stopped".into(),
    }
}

pub(crate) fn build_text_summary(summary: &RunSummary) -> TextSummary {
    let mut lines = Vec::new();
    lines.push(format!("Command: {}", summary.command));

    let verdict = match summary.phase {
        Phase::Succeeded => format!(
            "Result: completed successfully after {} attempt(s)",
            summary.attempts_made
        ),
        Phase::Failed => format!("Result: failed after {} attempt(s)", summary.attempts_made),
        Phase::Stopped => format!(
            "Result: stopped during attempt {}",
            summary.attempts_made
        ),
        Phase::Running | Phase::Idle => format!("Result: {}", summary.phase.label()),
    };
    lines.push(verdict);
    lines.push(format!(
        "Retries used: {}/{}",
        summary.attempts_made.saturating_sub(1),
        summary.max_retries
    ));

    for a in &summary.attempts {
        lines.push(format!(
            "  Attempt {}: {} ({} line(s))",
            a.index,
            describe_outcome(a.outcome.as_ref()),
            a.line_count
        ));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttemptSummary;

    fn attempt(index: u32, outcome: AttemptOutcome, line_count: usize) -> AttemptSummary {
        AttemptSummary {
            index,
            outcome: Some(outcome),
            line_count,
            started_at: "2026-01-01T00:00:00Z".into(),
            finished_at: Some("2026-01-01T00:00:01Z".into()),
        }
    }

    #[test]
    fn summarizes_a_recovered_run() {
        let summary = RunSummary {
            command: "pnpm run run".into(),
            phase: Phase::Succeeded,
            attempts_made: 2,
            max_retries: 5,
            attempts: vec![
                attempt(1, AttemptOutcome::Exited(1), 3),
                attempt(2, AttemptOutcome::Exited(0), 10),
            ],
        };
        let lines = build_text_summary(&summary).lines;
        assert_eq!(
            lines,
            vec![
                "Command: pnpm run run",
                "Result: completed successfully after 2 attempt(s)",
                "Retries used: 1/5",
                "  Attempt 1: exit code 1 (3 line(s))",
                "  Attempt 2: succeeded (10 line(s))",
            ]
        );
    }

    #[test]
    fn describes_every_outcome() {
        assert_eq!(describe_outcome(None), "running");
        assert_eq!(
            describe_outcome(Some(&AttemptOutcome::SpawnFailed("not found".into()))),
            "could not start (not found)"
        );
        assert_eq!(
            describe_outcome(Some(&AttemptOutcome::Terminated)),
            "terminated by signal"
        );
        assert_eq!(describe_outcome(Some(&AttemptOutcome::Stopped)), "stopped");
    }

    #[test]
    fn stopped_run_mentions_the_attempt() {
        let summary = RunSummary {
            command: "make".into(),
            phase: Phase::Stopped,
            attempts_made: 1,
            max_retries: 0,
            attempts: vec![attempt(1, AttemptOutcome::Stopped, 0)],
        };
        let lines = build_text_summary(&summary).lines;
        assert_eq!(lines[1], "Result: stopped during attempt 1");
        assert_eq!(lines[2], "Retries used: 0/0");
    }
}
