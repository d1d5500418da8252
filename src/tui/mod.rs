mod help;
mod state;

use crate::cli::{build_config, Cli};
use crate::model::{LineSource, OutputLine, Phase, SupervisorEvent};
use crate::orchestrator::{self, UiCommand};
use crate::supervisor::{ShellRunner, Supervisor};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Terminal,
};
use state::{phase_color, push_wrapped_status_kv, UiState};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    // Unbounded channels so the supervised process is never stalled by rendering.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SupervisorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let runner = Arc::new(ShellRunner::new(&cfg));
    let supervisor = Supervisor::new(cfg, runner, event_tx.clone());

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_state = UiState::new(supervisor.snapshot(), args.scrollback);
    let tick_rate = Duration::from(args.poll_interval).max(Duration::from_millis(10));
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_state, tick_rate, event_rx, cmd_tx));

    let res =
        orchestrator::run_controller(&supervisor, args.start_on_launch, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    mut state: UiState,
    tick_rate: Duration,
    mut event_rx: UnboundedReceiver<SupervisorEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut last_tick = Instant::now() - tick_rate;
    let mut page = 20usize;

    let res = loop {
        if last_tick.elapsed() >= tick_rate {
            // Drain events without blocking; the worker never waits on us.
            while let Ok(ev) = event_rx.try_recv() {
                state.apply_event(ev);
            }
            terminal
                .draw(|f| {
                    page = usize::from(f.area().height.saturating_sub(10)).max(1);
                    draw(f.area(), f, &state)
                })
                .ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if !event::poll(Duration::from_millis(10)).unwrap_or(false) {
            continue;
        }
        let Ok(Event::Key(k)) = event::read() else {
            continue;
        };
        if k.kind != KeyEventKind::Press {
            continue;
        }
        match (k.modifiers, k.code) {
            (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                let _ = cmd_tx.send(UiCommand::Quit);
                break Ok(());
            }
            (_, KeyCode::Char('s')) => {
                let _ = cmd_tx.send(UiCommand::Start);
            }
            (_, KeyCode::Char('x')) => {
                let _ = cmd_tx.send(UiCommand::Stop);
            }
            (_, KeyCode::Enter) => {
                let cmd = if state.supervisor.phase == Phase::Running {
                    UiCommand::Stop
                } else {
                    UiCommand::Start
                };
                let _ = cmd_tx.send(cmd);
            }
            (_, KeyCode::Char('a')) => {
                let enabled = !state.supervisor.auto_retry;
                state.supervisor.auto_retry = enabled;
                let _ = cmd_tx.send(UiCommand::SetAutoRetry(enabled));
            }
            (_, KeyCode::Char('c')) => {
                state.clear_log();
                state.info = "Log cleared".into();
            }
            (_, KeyCode::Tab) => state.tab = (state.tab + 1) % 2,
            (_, KeyCode::Char('?')) => state.tab = 1,
            (_, KeyCode::Up) | (_, KeyCode::Char('k')) => state.scroll_up(1),
            (_, KeyCode::Down) | (_, KeyCode::Char('j')) => state.scroll_down(1),
            (_, KeyCode::PageUp) => state.scroll_up(page),
            (_, KeyCode::PageDown) => state.scroll_down(page),
            (_, KeyCode::Home) | (_, KeyCode::Char('g')) => state.scroll_to_top(),
            (_, KeyCode::End) | (_, KeyCode::Char('G')) | (_, KeyCode::Char('f')) => {
                state.follow_tail()
            }
            _ => {}
        }
        // Reflect key presses on the next loop iteration.
        last_tick = Instant::now() - tick_rate;
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Output"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("retry-runner"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_output(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_output(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let status_lines = status_lines(state, area.width);
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(status_lines.len() as u16 + 2),
                Constraint::Min(3),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(area);

    let status = Paragraph::new(status_lines)
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, main[0]);

    let height = usize::from(main[1].height.saturating_sub(2));
    let lines: Vec<Line> = state.visible_lines(height).map(render_line).collect();
    let mut title = vec![Span::raw("Output Log")];
    if state.dropped_lines > 0 {
        title.push(Span::styled(
            format!(" ({} older lines dropped)", state.dropped_lines),
            Style::default().fg(Color::Gray),
        ));
    }
    if !state.following() {
        title.push(Span::styled(
            format!(" [scrolled {} up, End to follow]", state.scroll_offset),
            Style::default().fg(Color::Yellow),
        ));
    }
    let log = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(Line::from(title)),
    );
    f.render_widget(log, main[1]);

    let hints = Line::from(vec![
        Span::styled("s", Style::default().fg(Color::Magenta)),
        Span::raw(" start  "),
        Span::styled("x", Style::default().fg(Color::Magenta)),
        Span::raw(" stop  "),
        Span::styled("a", Style::default().fg(Color::Magenta)),
        Span::raw(" auto-retry  "),
        Span::styled("c", Style::default().fg(Color::Magenta)),
        Span::raw(" clear  "),
        Span::styled("?", Style::default().fg(Color::Magenta)),
        Span::raw(" help  "),
        Span::styled("q", Style::default().fg(Color::Magenta)),
        Span::raw(" quit"),
    ]);
    f.render_widget(Paragraph::new(hints), main[2]);
}

fn status_lines(state: &UiState, width: u16) -> Vec<Line<'static>> {
    let s = &state.supervisor;
    let phase_style = Style::default()
        .fg(phase_color(s.phase))
        .add_modifier(Modifier::BOLD);
    let auto = if s.auto_retry { "on" } else { "off" };

    let mut out = vec![Line::from(vec![
        Span::styled("Status: ", Style::default().fg(Color::Gray)),
        Span::styled(state.status_text(), phase_style),
        Span::raw("   "),
        Span::styled("Retries: ", Style::default().fg(Color::Gray)),
        Span::raw(format!("{}/{}", s.retries_used(), s.max_retries)),
        Span::raw("   "),
        Span::styled("Auto-retry on error: ", Style::default().fg(Color::Gray)),
        Span::styled(
            auto,
            Style::default().fg(if s.auto_retry { Color::Green } else { Color::Red }),
        ),
    ])];
    push_wrapped_status_kv(&mut out, "Command", &s.command, width);
    if let Some((attempt, outcome)) = state.last_outcome.as_ref() {
        let text = crate::text_summary::describe_outcome(Some(outcome));
        push_wrapped_status_kv(&mut out, "Last attempt", &format!("#{attempt} {text}"), width);
    }
    push_wrapped_status_kv(&mut out, "Info", &state.info, width);
    out
}

fn render_line(line: &OutputLine) -> Line<'static> {
    match line.source {
        LineSource::Process => Line::from(line.text.clone()),
        LineSource::Supervisor => {
            let color = if line.text.contains("completed successfully") {
                Color::Green
            } else if line.text.contains("failed")
                || line.text.starts_with("--- Error")
                || line.text.starts_with("--- Giving up")
                || line.text.contains("terminated")
            {
                Color::Red
            } else {
                Color::Cyan
            };
            Line::from(Span::styled(
                line.text.clone(),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ))
        }
    }
}
