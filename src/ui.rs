use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthChar;

use crate::app::{App, ChatRole, FocusPane, InputMode, LineInput, Status};
use crate::config::DEFAULT_BACKEND_URL;
use crate::render::{table_lines, BubbleBody, TableLine, TableView};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat log, settings, prompt, footer
    let [header_area, log_area, settings_area, prompt_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_log(app, frame, log_area);
    render_settings(app, frame, settings_area);
    render_prompt(app, frame, prompt_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let status = match app.status {
        // Animated ellipsis: cycles through ".", "..", "..."
        Status::Sending => format!(" Sending{}", ".".repeat(app.animation_frame as usize + 1)),
        Status::Idle => String::new(),
    };

    let title = Line::from(vec![
        Span::styled(" planchat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(status, Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC)),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::Black));
    frame.render_widget(header, area);
}

fn render_log(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Log;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" Chat ({}) ", app.log.len()));

    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);
    let chat = Paragraph::new(Text::from(chat_lines(app, inner_width as usize)))
        .wrap(Wrap { trim: false });

    // Count rows with the same word wrapping the log is drawn with
    let total_lines = chat.line_count(inner_width).min(u16::MAX as usize) as u16;
    app.log_area = Some(area);
    app.log_height = inner_height;
    app.log_max_scroll = total_lines.saturating_sub(inner_height);
    if app.follow_log {
        app.log_scroll = app.log_max_scroll;
    } else {
        app.log_scroll = app.log_scroll.min(app.log_max_scroll);
    }

    let chat = chat.block(block).scroll((app.log_scroll, 0));

    frame.render_widget(chat, area);
}

fn chat_lines(app: &App, width: usize) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    for msg in app.log.messages() {
        let label = match msg.role {
            ChatRole::User => Span::styled(
                "You:",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            ChatRole::Assistant => Span::styled(
                "Assistant:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
        };
        lines.push(Line::from(label));

        match &msg.body {
            BubbleBody::Text(text) => {
                for line in text.lines() {
                    lines.push(Line::from(line.to_string()));
                }
            }
            BubbleBody::Table(table) => lines.extend(table_view_lines(table, width)),
        }
        lines.push(Line::default());
    }

    lines
}

fn table_view_lines(table: &TableView, width: usize) -> Vec<Line<'static>> {
    table_lines(table, width)
        .into_iter()
        .map(|line| match line {
            TableLine::Title(text) => Line::from(Span::styled(
                text,
                Style::default().add_modifier(Modifier::BOLD),
            )),
            TableLine::Header(text) => Line::from(Span::styled(
                text,
                Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
            )),
            TableLine::Rule(text) => Line::from(Span::styled(text, Style::default().fg(Color::DarkGray))),
            TableLine::Row(text) => Line::from(text),
            TableLine::Caption(text) => Line::from(Span::styled(
                text,
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )),
        })
        .collect()
}

fn render_settings(app: &App, frame: &mut Frame, area: Rect) {
    let [backend_area, stream_area] = Layout::horizontal([
        Constraint::Min(20),
        Constraint::Length(22),
    ])
    .areas(area);

    let backend_focused = app.focus == FocusPane::Backend;
    let backend_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if backend_focused { Color::Yellow } else { Color::DarkGray }))
        .title(" Backend URL ");

    if app.backend.text().is_empty() && !backend_focused {
        let placeholder = Paragraph::new(DEFAULT_BACKEND_URL)
            .style(Style::default().fg(Color::DarkGray))
            .block(backend_block);
        frame.render_widget(placeholder, backend_area);
    } else {
        render_line_input(
            frame,
            backend_area,
            backend_block,
            &app.backend,
            backend_focused && app.input_mode == InputMode::Editing,
        );
    }

    let (mark, label, color) = if app.stream {
        ("[x]", "on", Color::Green)
    } else {
        ("[ ]", "off", Color::DarkGray)
    };
    let stream_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Stream (^S) ");
    let stream = Paragraph::new(Line::from(vec![
        Span::styled(format!(" {} ", mark), Style::default().fg(color).bold()),
        Span::styled(label, Style::default().fg(color)),
    ]))
    .block(stream_block);
    frame.render_widget(stream, stream_area);
}

fn render_prompt(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Prompt;
    let border_color = if focused {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Message (Enter to send, Shift+Enter or ^J for newline) ");

    render_line_input(
        frame,
        area,
        block,
        &app.prompt,
        focused && app.input_mode == InputMode::Editing,
    );
}

/// Draw a single-line input with horizontal scrolling that keeps the cursor visible.
fn render_line_input(frame: &mut Frame, area: Rect, block: Block, input: &LineInput, show_cursor: bool) {
    let inner_width = area.width.saturating_sub(2) as usize;
    // Newlines show as a return symbol so the field stays on one row
    let chars: Vec<char> = input
        .text()
        .chars()
        .map(|c| if c == '\n' { '↵' } else { c })
        .collect();
    let columns = |c: &char| c.width().unwrap_or(0);

    // Scroll by whole characters until the cursor column fits
    let cursor = input.cursor().min(chars.len());
    let mut start = 0;
    let mut cursor_x: usize = chars[..cursor].iter().map(columns).sum();
    while cursor_x >= inner_width && start < cursor {
        cursor_x -= columns(&chars[start]);
        start += 1;
    }

    let mut used = 0;
    let visible_text: String = chars[start..]
        .iter()
        .take_while(|c| {
            used += columns(*c);
            used <= inner_width
        })
        .collect();

    let paragraph = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(paragraph, area);

    if show_cursor {
        frame.set_cursor_position((area.x + cursor_x as u16 + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " EDIT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut spans = vec![Span::styled(mode_text, mode_style)];
    let hints: &[(&str, &str)] = match app.input_mode {
        InputMode::Editing => &[
            (" Enter ", " send "),
            (" ^J ", " newline "),
            (" Tab ", " focus "),
            (" ^S ", " stream "),
            (" Esc ", " browse "),
            (" ^C ", " quit "),
        ],
        InputMode::Normal => &[
            (" j/k ", " scroll "),
            (" g/G ", " top/bottom "),
            (" i ", " type "),
            (" b ", " backend "),
            (" s ", " stream "),
            (" q ", " quit "),
        ],
    };
    for (key, label) in hints {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
