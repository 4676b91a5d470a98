use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use futures::StreamExt;
use itertools::Itertools;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::stdout;
use unicode_width::UnicodeWidthChar;

use crate::{
    client::{
        AppSnapshot,
        FailedOp,
        NotificationKind,
    },
    images::{
        Preview,
        SlotId,
        SlotState,
    },
    render::{
        Body,
        EndScreen,
        star_bar,
    },
};

const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const SHIMMER: [&str; 3] = ["\u{2591}", "\u{2592}", "\u{2593}"];

pub enum UserEvent {
    Quit,
    NextChoice,
    PrevChoice,
    ConfirmChoice,
    Reset,
    RetryFailed,
    Reload,
    RetryImage(SlotId),
    OpenShare,
    CloseShare,
    ConnectWallet,
    DisconnectWallet,
    SaveToChain,
    Redraw,
}

pub struct UiState {
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
    frame: usize,
}

impl Default for UiState {
    fn default() -> Self {
        UiState {
            terminal: None,
            frame: 0,
        }
    }
}

pub type InputEventReceiver = EventStream;

pub fn input_event_stream() -> InputEventReceiver {
    EventStream::new()
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    match events.next().await {
        Some(Ok(event)) => Ok(event),
        Some(Err(err)) => Err(err.into()),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen
    )?;
    // One persistent Terminal so buffers survive across draws.
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn interpret_event(
    _state: &mut UiState,
    snap: &AppSnapshot,
    event: Event,
) -> Option<UserEvent> {
    let key = match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => key,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    if snap.share_open {
        return match key.code {
            KeyCode::Esc | KeyCode::Char('q') => Some(UserEvent::CloseShare),
            KeyCode::Char('r') => Some(UserEvent::RetryImage(SlotId::Share)),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(UserEvent::Quit),
        KeyCode::Down | KeyCode::Char('j') => Some(UserEvent::NextChoice),
        KeyCode::Up | KeyCode::Char('k') => Some(UserEvent::PrevChoice),
        KeyCode::Enter => Some(UserEvent::ConfirmChoice),
        KeyCode::Char('g') => Some(UserEvent::Reset),
        KeyCode::Char('y') => Some(UserEvent::RetryFailed),
        KeyCode::Char('u') => Some(UserEvent::Reload),
        KeyCode::Char('1') => Some(UserEvent::RetryImage(SlotId::Story)),
        KeyCode::Char('2') => Some(UserEvent::RetryImage(SlotId::Manga)),
        KeyCode::Char('3') => Some(UserEvent::RetryImage(SlotId::Summary)),
        KeyCode::Char('s') => Some(UserEvent::OpenShare),
        KeyCode::Char('w') => Some(UserEvent::ConnectWallet),
        KeyCode::Char('d') => Some(UserEvent::DisconnectWallet),
        KeyCode::Char('b') => Some(UserEvent::SaveToChain),
        _ => None,
    }
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    state.frame = state.frame.wrapping_add(1);
    let frame_count = state.frame;
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| render_app(f, frame_count, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

fn render_app(f: &mut Frame, frame_count: usize, snap: &AppSnapshot) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(1),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(f.area());

    render_header(f, chunks[0], snap);
    render_status_line(f, chunks[1], frame_count, snap);
    render_body(f, chunks[2], frame_count, snap);
    render_footer(f, chunks[3], snap);
    render_notifications(f, chunks[2], snap);

    if snap.share_open {
        render_share_modal(f, frame_count, snap);
    }
}

fn render_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let score = snap.screen.as_ref().map(|s| s.score).unwrap_or(0);
    let wallet = if let Some(short) = snap.wallet.short_address() {
        let balance = snap
            .wallet
            .balance
            .map(|b| format!(" | {b:.2} PAS"))
            .unwrap_or_default();
        Span::styled(
            format!("{short}{balance}"),
            Style::default().fg(Color::Magenta),
        )
    } else if snap.wallet_available {
        Span::styled("[w] connect wallet", Style::default().fg(Color::DarkGray))
    } else {
        Span::styled("wallet disabled", Style::default().fg(Color::DarkGray))
    };
    let line = Line::from(vec![
        Span::styled(
            "Mystic Forest Adventure",
            Style::default().fg(Color::Green).bold(),
        ),
        Span::raw("   "),
        Span::styled(format!("Score: {score}"), Style::default().fg(Color::Yellow)),
        Span::raw("   "),
        wallet,
    ]);
    let header = Paragraph::new(line)
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
    f.render_widget(header, area);
}

fn render_status_line(f: &mut Frame, area: Rect, frame_count: usize, snap: &AppSnapshot) {
    let line = if let Some(text) = &snap.busy {
        let spinner = SPINNER_FRAMES[frame_count % SPINNER_FRAMES.len()];
        Line::from(Span::styled(
            format!(" {spinner} {text}"),
            Style::default().fg(Color::Cyan),
        ))
    } else if snap.failure.is_some() {
        Line::from(Span::styled(
            " something went wrong - recovery options below",
            Style::default().fg(Color::Red),
        ))
    } else {
        Line::default()
    };
    f.render_widget(Paragraph::new(line), area);
}

fn render_body(f: &mut Frame, area: Rect, frame_count: usize, snap: &AppSnapshot) {
    let columns =
        Layout::horizontal([Constraint::Percentage(42), Constraint::Percentage(58)])
            .split(area);

    render_slot_panel(f, columns[0], frame_count, SlotId::Story, snap);

    let Some(screen) = &snap.screen else {
        let placeholder = Paragraph::new("Loading your adventure...")
            .block(Block::default().borders(Borders::ALL).title("Story"))
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(placeholder, columns[1]);
        return;
    };

    match &screen.body {
        Body::End(end) => {
            let rows = Layout::vertical([
                Constraint::Min(8),
                Constraint::Length(SLOT_PANEL_HEIGHT),
            ])
            .split(columns[1]);
            render_end_text(f, rows[0], snap, screen.reset_label, end);
            let slots = Layout::horizontal([
                Constraint::Percentage(50),
                Constraint::Percentage(50),
            ])
            .split(rows[1]);
            render_slot_panel(f, slots[0], frame_count, SlotId::Manga, snap);
            render_slot_panel(f, slots[1], frame_count, SlotId::Summary, snap);
        }
        body => {
            let rows =
                Layout::vertical([Constraint::Min(4), Constraint::Min(5)]).split(columns[1]);
            render_situation(f, rows[0], snap, &screen.situation);
            render_choices(f, rows[1], snap, screen.reset_label, body);
        }
    }
}

fn render_situation(f: &mut Frame, area: Rect, snap: &AppSnapshot, situation: &str) {
    let text = if let Some(failure) = &snap.failure {
        Text::from(vec![
            Line::from(Span::styled(
                failure.message.clone(),
                Style::default().fg(Color::Red),
            )),
        ])
    } else {
        Text::from(situation.to_string())
    };
    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Story"));
    f.render_widget(paragraph, area);
}

fn render_choices(
    f: &mut Frame,
    area: Rect,
    snap: &AppSnapshot,
    reset_label: &str,
    body: &Body,
) {
    let mut lines: Vec<Line> = Vec::new();
    // The reset control always leads the per-state content.
    lines.push(Line::from(Span::styled(
        format!("[g] {reset_label}"),
        Style::default().fg(Color::Blue),
    )));
    lines.push(Line::default());

    if let Some(failure) = &snap.failure {
        lines.extend(recovery_lines(failure));
    } else {
        match body {
            Body::Story { choices } => {
                let width = area.width.saturating_sub(6) as usize;
                for (position, choice) in choices.iter().enumerate() {
                    let selected = position == snap.selected_choice;
                    let marker = if selected { "> " } else { "  " };
                    let label =
                        truncate_to_width(&format!("{}. {}", choice.index + 1, choice.label), width);
                    let style = if selected {
                        Style::default().fg(Color::Green).bold()
                    } else {
                        Style::default()
                    };
                    lines.push(Line::from(Span::styled(
                        format!("{marker}{label}"),
                        style,
                    )));
                }
            }
            Body::NoChoices => {
                lines.push(Line::from(Span::styled(
                    "No choices available",
                    Style::default().fg(Color::Red),
                )));
                lines.push(Line::from(Span::styled(
                    "The story cannot continue from here; reset to start over.",
                    Style::default().fg(Color::DarkGray),
                )));
            }
            Body::End(_) => {}
        }
    }

    let paragraph = Paragraph::new(Text::from(lines))
        .block(Block::default().borders(Borders::ALL).title("Choices"));
    f.render_widget(paragraph, area);
}

fn recovery_lines(failure: &FailedOp) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        failure.message.clone(),
        Style::default().fg(Color::Red),
    ))];
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "[y] Try again    [u] Reload game    [g] Reset Game",
        Style::default().fg(Color::Blue),
    )));
    lines
}

fn render_end_text(
    f: &mut Frame,
    area: Rect,
    snap: &AppSnapshot,
    reset_label: &str,
    end: &EndScreen,
) {
    let mut lines = vec![
        Line::from(Span::styled(
            end.category.clone(),
            Style::default().fg(Color::Green).bold(),
        )),
        Line::from(vec![
            Span::styled("Final Score: ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                end.score.to_string(),
                Style::default().fg(Color::Yellow).bold(),
            ),
            Span::raw("  "),
            Span::styled(star_bar(end.stars), Style::default().fg(Color::Yellow)),
        ]),
        Line::default(),
        Line::from(end.situation.clone()),
        Line::default(),
        Line::from(Span::styled(
            end.message,
            Style::default().fg(Color::Cyan),
        )),
        Line::default(),
    ];
    let mut controls = format!("[g] {reset_label}    [s] Share Your Story");
    if snap.wallet.connected() {
        controls.push_str("    [b] Save to Blockchain");
    }
    lines.push(Line::from(Span::styled(
        controls,
        Style::default().fg(Color::Blue),
    )));
    if let Some(failure) = &snap.failure {
        lines.push(Line::default());
        lines.extend(recovery_lines(failure));
    }
    let paragraph = Paragraph::new(Text::from(lines))
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("The End"));
    f.render_widget(paragraph, area);
}

const SLOT_PANEL_HEIGHT: u16 = 18;

fn render_slot_panel(
    f: &mut Frame,
    area: Rect,
    frame_count: usize,
    slot: SlotId,
    snap: &AppSnapshot,
) {
    let retry_key = match slot {
        SlotId::Story => "1",
        SlotId::Manga => "2",
        SlotId::Summary => "3",
        SlotId::Share => "r",
    };
    let text = match snap.slot(slot) {
        None | Some(SlotState::Idle) => Text::from(Span::styled(
            "...",
            Style::default().fg(Color::DarkGray),
        )),
        Some(SlotState::Empty { alt }) => Text::from(vec![
            Line::from(Span::styled(
                format!("({alt} unavailable)"),
                Style::default().fg(Color::DarkGray),
            )),
            Line::default(),
            Line::from(Span::styled(
                "No Image URL Provided. Cannot Retry.",
                Style::default().fg(Color::DarkGray).italic(),
            )),
        ]),
        Some(SlotState::Loading { alt, .. }) => {
            let spinner = SPINNER_FRAMES[frame_count % SPINNER_FRAMES.len()];
            let shimmer = SHIMMER[frame_count % SHIMMER.len()].repeat(12);
            Text::from(vec![
                Line::from(Span::styled(
                    format!("{spinner} loading {alt}..."),
                    Style::default().fg(Color::Cyan),
                )),
                Line::from(Span::styled(
                    shimmer,
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        }
        Some(SlotState::Loaded { preview, alt }) => {
            let mut lines = preview_lines(preview);
            lines.push(Line::from(Span::styled(
                format!("{alt} ({}x{})", preview.source_width, preview.source_height),
                Style::default().fg(Color::DarkGray),
            )));
            Text::from(lines)
        }
        Some(SlotState::Failed { error, .. }) => Text::from(vec![
            Line::from(Span::styled(
                "Failed to load image",
                Style::default().fg(Color::Red),
            )),
            Line::from(Span::styled(
                truncate_to_width(error, area.width.saturating_sub(4) as usize),
                Style::default().fg(Color::DarkGray),
            )),
            Line::default(),
            Line::from(Span::styled(
                format!("[{retry_key}] Retry"),
                Style::default().fg(Color::Blue).bold(),
            )),
        ]),
    };
    let panel = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(slot.label()),
    );
    f.render_widget(panel, area);
}

/// Two thumbnail rows collapse into one line of upper-half blocks: foreground
/// carries the top pixel, background the bottom one.
fn preview_lines(preview: &Preview) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for pair in preview.rows.chunks(2) {
        let top = &pair[0];
        let bottom = pair.get(1);
        let spans: Vec<Span> = top
            .iter()
            .enumerate()
            .map(|(x, &(r, g, b))| {
                let mut style = Style::default().fg(Color::Rgb(r, g, b));
                if let Some((br, bg, bb)) = bottom.and_then(|row| row.get(x)).copied() {
                    style = style.bg(Color::Rgb(br, bg, bb));
                }
                Span::styled("\u{2580}", style)
            })
            .collect();
        lines.push(Line::from(spans));
    }
    lines
}

fn render_notifications(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    if snap.notifications.is_empty() {
        return;
    }
    let lines: Vec<Line> = snap
        .notifications
        .iter()
        .rev()
        .take(4)
        .map(|(message, kind)| {
            let color = match kind {
                NotificationKind::Success => Color::Green,
                NotificationKind::Error => Color::Red,
                NotificationKind::Warning => Color::Yellow,
                NotificationKind::Info => Color::Cyan,
            };
            Line::from(Span::styled(format!(" {message} "), Style::default().fg(Color::Black).bg(color)))
        })
        .collect();
    let height = lines.len() as u16;
    let width = lines
        .iter()
        .map(|l| l.width() as u16)
        .max()
        .unwrap_or(0)
        .min(area.width);
    let popup = Rect {
        x: area.right().saturating_sub(width + 1),
        y: area.y,
        width,
        height: height.min(area.height),
    };
    f.render_widget(Clear, popup);
    f.render_widget(Paragraph::new(Text::from(lines)), popup);
}

fn render_share_modal(f: &mut Frame, frame_count: usize, snap: &AppSnapshot) {
    let area = centered_rect(64, 70, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Share Your Story");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::vertical([
        Constraint::Min(6),
        Constraint::Length(2),
        Constraint::Length(1),
    ])
    .split(inner);
    render_slot_panel(f, rows[0], frame_count, SlotId::Share, snap);
    let url = snap.share_url.as_deref().unwrap_or("");
    f.render_widget(
        Paragraph::new(truncate_to_width(url, rows[1].width as usize))
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true }),
        rows[1],
    );
    f.render_widget(
        Paragraph::new("[r] retry    [Esc] close")
            .style(Style::default().fg(Color::Blue)),
        rows[2],
    );
}

fn render_footer(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut hints = vec!["q quit", "j/k select", "Enter choose", "g reset"];
    if snap
        .screen
        .as_ref()
        .is_some_and(|s| matches!(s.body, Body::End(_)))
    {
        hints.push("s share");
    }
    if snap.wallet.connected() {
        hints.push("d disconnect");
    } else if snap.wallet_available {
        hints.push("w wallet");
    }
    let footer = Paragraph::new(hints.iter().join("  \u{00b7}  "))
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(footer, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    let horizontal = Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(vertical[1]);
    horizontal[1]
}

fn truncate_to_width(text: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut out = String::new();
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if width + w > max_width {
            break;
        }
        width += w;
        out.push(ch);
    }
    out
}
