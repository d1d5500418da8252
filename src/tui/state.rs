use crate::model::{AttemptOutcome, OutputLine, Phase, SupervisorEvent, SupervisorState};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MAX_COUNTDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub struct UiState {
    pub tab: usize,
    pub info: String,
    pub supervisor: SupervisorState,

    // Scrollback of output lines, oldest first.
    pub lines: VecDeque<OutputLine>,
    pub scrollback: usize,
    pub dropped_lines: u64,
    /// Lines between the bottom of the view and the newest line; 0 = following.
    pub scroll_offset: usize,

    pub last_outcome: Option<(u32, AttemptOutcome)>,
    pub next_retry_at: Option<Instant>,
}

impl UiState {
    pub fn new(supervisor: SupervisorState, scrollback: usize) -> Self {
        Self {
            tab: 0,
            info: String::new(),
            supervisor,
            lines: VecDeque::new(),
            scrollback: scrollback.max(1),
            dropped_lines: 0,
            scroll_offset: 0,
            last_outcome: None,
            next_retry_at: None,
        }
    }

    pub fn apply_event(&mut self, ev: SupervisorEvent) {
        match ev {
            SupervisorEvent::StateChanged(s) => {
                if s.phase != Phase::Running || s.attempts_made != self.supervisor.attempts_made {
                    self.next_retry_at = None;
                }
                if s.phase == Phase::Running && s.run_id != self.supervisor.run_id {
                    self.last_outcome = None;
                }
                self.supervisor = s;
            }
            SupervisorEvent::Line(line) => self.push_line(line),
            SupervisorEvent::AttemptFinished { attempt, outcome } => {
                self.last_outcome = Some((attempt, outcome));
            }
            SupervisorEvent::RetryScheduled { delay, .. } => {
                // Capped so an absurd --retry-delay cannot overflow Instant.
                let delay = delay.min(MAX_COUNTDOWN);
                self.next_retry_at = Instant::now().checked_add(delay);
            }
            SupervisorEvent::Info(msg) => self.info = msg,
        }
    }

    fn push_line(&mut self, line: OutputLine) {
        self.lines.push_back(line);
        if self.lines.len() > self.scrollback {
            self.lines.pop_front();
            self.dropped_lines += 1;
        }
        // Keep a scrolled-back view anchored on the same lines.
        if self.scroll_offset > 0 {
            self.scroll_offset = (self.scroll_offset + 1).min(self.max_offset());
        }
    }

    /// Clear the log only; the supervised run is unaffected.
    pub fn clear_log(&mut self) {
        self.lines.clear();
        self.dropped_lines = 0;
        self.scroll_offset = 0;
    }

    pub fn following(&self) -> bool {
        self.scroll_offset == 0
    }

    fn max_offset(&self) -> usize {
        self.lines.len().saturating_sub(1)
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(n).min(self.max_offset());
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(n);
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_offset = self.max_offset();
    }

    pub fn follow_tail(&mut self) {
        self.scroll_offset = 0;
    }

    /// Lines to show in a viewport `height` rows tall.
    pub fn visible_lines(&self, height: usize) -> impl Iterator<Item = &OutputLine> {
        let end = self.lines.len().saturating_sub(self.scroll_offset);
        let start = end.saturating_sub(height);
        self.lines.range(start..end)
    }

    pub fn retry_countdown(&self) -> Option<Duration> {
        self.next_retry_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn status_text(&self) -> String {
        let s = &self.supervisor;
        match s.phase {
            Phase::Idle => "Idle".into(),
            Phase::Running if s.attempts_made == 0 => "Starting...".into(),
            Phase::Running => match self.retry_countdown() {
                Some(left) => format!(
                    "Waiting to retry ({}s)",
                    left.as_secs() + u64::from(left.subsec_millis() > 0)
                ),
                None => format!("Running (attempt {}/{})", s.attempts_made, s.max_attempts()),
            },
            Phase::Succeeded => "Completed Successfully".into(),
            Phase::Failed => format!("Failed after {} attempts", s.attempts_made),
            Phase::Stopped => "Stopped".into(),
        }
    }
}

pub fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Idle => Color::Gray,
        Phase::Running => Color::Yellow,
        Phase::Succeeded => Color::Green,
        Phase::Failed => Color::Red,
        Phase::Stopped => Color::Magenta,
    }
}

/// Push `label: value`, wrapping the value to the status block's inner width.
/// Continuation rows are indented two columns; blank values are skipped.
pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    width: u16,
) {
    let value: Vec<char> = value.trim().chars().collect();
    if value.is_empty() {
        return;
    }

    let label = format!("{label}: ");
    // Two border columns plus one column of padding on each side.
    let inner = usize::from(width.saturating_sub(4)).max(1);
    let first = inner.saturating_sub(label.chars().count()).max(1);
    let (head, mut rest) = value.split_at(first.min(value.len()));

    out.push(Line::from(vec![
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::raw(head.iter().collect::<String>()),
    ]));
    let cont = inner.saturating_sub(2).max(1);
    while !rest.is_empty() {
        let (row, tail) = rest.split_at(cont.min(rest.len()));
        out.push(Line::from(vec![
            Span::raw("  "),
            Span::raw(row.iter().collect::<String>()),
        ]));
        rest = tail;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LineSource, SupervisorConfig};

    fn state(scrollback: usize) -> UiState {
        UiState::new(SupervisorState::new(&SupervisorConfig::default()), scrollback)
    }

    fn line(attempt: u32, text: &str) -> SupervisorEvent {
        SupervisorEvent::Line(OutputLine {
            attempt,
            text: text.into(),
            source: LineSource::Process,
        })
    }

    fn texts(ui: &UiState, height: usize) -> Vec<String> {
        ui.visible_lines(height).map(|l| l.text.clone()).collect()
    }

    #[test]
    fn scrollback_is_capped() {
        let mut ui = state(3);
        for i in 0..5 {
            ui.apply_event(line(1, &format!("l{i}")));
        }
        assert_eq!(ui.lines.len(), 3);
        assert_eq!(ui.dropped_lines, 2);
        assert_eq!(texts(&ui, 10), vec!["l2", "l3", "l4"]);
    }

    #[test]
    fn clearing_the_log_leaves_state_alone() {
        let mut ui = state(100);
        let mut running = ui.supervisor.clone();
        running.phase = Phase::Running;
        running.attempts_made = 2;
        ui.apply_event(SupervisorEvent::StateChanged(running.clone()));
        ui.apply_event(line(2, "x"));

        ui.clear_log();
        assert!(ui.lines.is_empty());
        assert_eq!(ui.supervisor, running);
    }

    #[test]
    fn scrolled_view_stays_anchored() {
        let mut ui = state(100);
        for i in 0..10 {
            ui.apply_event(line(1, &format!("l{i}")));
        }
        ui.scroll_up(4);
        assert_eq!(texts(&ui, 2), vec!["l4", "l5"]);

        ui.apply_event(line(1, "l10"));
        assert_eq!(texts(&ui, 2), vec!["l4", "l5"]);
        assert!(!ui.following());

        ui.follow_tail();
        assert_eq!(texts(&ui, 2), vec!["l9", "l10"]);
    }

    #[test]
    fn scrolling_is_clamped() {
        let mut ui = state(100);
        ui.apply_event(line(1, "only"));
        ui.scroll_up(50);
        assert_eq!(ui.scroll_offset, 0);
        ui.scroll_down(5);
        assert_eq!(texts(&ui, 5), vec!["only"]);
    }

    #[test]
    fn status_follows_the_supervisor() {
        let mut ui = state(10);
        assert_eq!(ui.status_text(), "Idle");

        let mut s = ui.supervisor.clone();
        s.phase = Phase::Running;
        s.run_id = 1;
        ui.apply_event(SupervisorEvent::StateChanged(s.clone()));
        assert_eq!(ui.status_text(), "Starting...");

        s.attempts_made = 2;
        ui.apply_event(SupervisorEvent::StateChanged(s.clone()));
        assert_eq!(ui.status_text(), "Running (attempt 2/6)");

        ui.apply_event(SupervisorEvent::RetryScheduled {
            attempt: 2,
            delay: Duration::from_secs(30),
        });
        assert!(ui.status_text().starts_with("Waiting to retry"));

        s.attempts_made = 3;
        ui.apply_event(SupervisorEvent::StateChanged(s.clone()));
        assert!(ui.next_retry_at.is_none());

        s.phase = Phase::Failed;
        ui.apply_event(SupervisorEvent::StateChanged(s));
        assert_eq!(ui.status_text(), "Failed after 3 attempts");
    }

    #[test]
    fn outcome_and_info_are_recorded() {
        let mut ui = state(10);
        ui.apply_event(SupervisorEvent::AttemptFinished {
            attempt: 1,
            outcome: AttemptOutcome::Exited(1),
        });
        ui.apply_event(SupervisorEvent::Info("Stopping…".into()));
        assert_eq!(ui.last_outcome, Some((1, AttemptOutcome::Exited(1))));
        assert_eq!(ui.info, "Stopping…");
    }

    #[test]
    fn long_values_wrap() {
        let mut out = Vec::new();
        // 16 usable columns: 7 after "Command: ", then 14 per continuation row.
        push_wrapped_status_kv(&mut out, "Command", "a".repeat(30).as_str(), 20);
        let widths: Vec<usize> = out.iter().map(|l| l.width()).collect();
        assert_eq!(widths, vec![16, 16, 11]);

        push_wrapped_status_kv(&mut out, "Empty", "   ", 20);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn huge_retry_delay_still_counts_down() {
        let mut ui = state(10);
        let mut s = ui.supervisor.clone();
        s.phase = Phase::Running;
        s.attempts_made = 1;
        ui.apply_event(SupervisorEvent::StateChanged(s));
        ui.apply_event(SupervisorEvent::RetryScheduled {
            attempt: 1,
            delay: Duration::MAX,
        });
        assert!(ui.status_text().starts_with("Waiting to retry"));
    }
}
