use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;

use crate::app::{App, FocusPane, InputMode, Submission};
use crate::transport::BackendClient;
use crate::tui::AppEvent;

const MOUSE_SCROLL_LINES: u16 = 3;

/// Runs transport calls off the UI loop and posts the results back as events.
pub struct Dispatcher {
    client: BackendClient,
    tx: UnboundedSender<AppEvent>,
}

impl Dispatcher {
    pub fn new(client: BackendClient, tx: UnboundedSender<AppEvent>) -> Self {
        Self { client, tx }
    }

    pub fn dispatch(&self, submission: Submission) {
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = client
                .query(&submission.backend_url, &submission.query, submission.stream)
                .await;
            // The UI loop may already be gone on quit.
            let _ = tx.send(AppEvent::Reply {
                turn: submission.turn,
                result,
            });
        });
    }
}

pub fn handle_event(app: &mut App, dispatcher: &Dispatcher, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, dispatcher, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Reply { turn, result } => app.finish_turn(turn, result),
    }
}

fn handle_key(app: &mut App, dispatcher: &Dispatcher, key: KeyEvent) {
    // Global keys that work in any mode
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => {
                app.should_quit = true;
                return;
            }
            KeyCode::Char('s') => {
                app.toggle_stream();
                return;
            }
            _ => {}
        }
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => {
            if let Some(submission) = handle_editing_mode(app, key) {
                dispatcher.dispatch(submission);
            }
        }
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Back to typing
        KeyCode::Char('i') | KeyCode::Enter => {
            app.focus = FocusPane::Prompt;
            app.input_mode = InputMode::Editing;
        }
        KeyCode::Char('b') => {
            app.focus = FocusPane::Backend;
            app.input_mode = InputMode::Editing;
        }
        KeyCode::Char('s') => app.toggle_stream(),
        KeyCode::Tab => app.focus_next(),

        // Half-page scroll
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(app.half_page());
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(app.half_page());
        }

        // Log scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::PageDown => app.scroll_down(app.log_height.max(1)),
        KeyCode::PageUp => app.scroll_up(app.log_height.max(1)),
        KeyCode::Char('g') => app.scroll_top(),
        KeyCode::Char('G') => app.scroll_bottom(),

        _ => {}
    }
}

/// Edit the focused field. Returns a submission when Enter sends the prompt.
fn handle_editing_mode(app: &mut App, key: KeyEvent) -> Option<Submission> {
    match key.code {
        KeyCode::Esc => {
            if app.focus == FocusPane::Backend {
                app.commit_backend();
            }
            app.input_mode = InputMode::Normal;
            app.focus = FocusPane::Log;
        }
        KeyCode::Tab => app.focus_next(),
        // Ctrl+J and Alt+Enter also break the line where Shift+Enter is indistinguishable
        KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) && app.focus == FocusPane::Prompt =>
        {
            app.prompt.insert('\n');
        }
        KeyCode::Enter => match app.focus {
            FocusPane::Prompt if key.modifiers.intersects(KeyModifiers::SHIFT | KeyModifiers::ALT) => {
                app.prompt.insert('\n');
            }
            FocusPane::Prompt => return app.submit(),
            FocusPane::Backend => {
                app.commit_backend();
                app.focus = FocusPane::Prompt;
            }
            FocusPane::Log => {}
        },
        KeyCode::PageUp => app.scroll_up(app.log_height.max(1)),
        KeyCode::PageDown => app.scroll_down(app.log_height.max(1)),
        code => {
            if let Some(input) = app.focused_input() {
                match code {
                    KeyCode::Backspace => input.backspace(),
                    KeyCode::Delete => input.delete(),
                    KeyCode::Left => input.left(),
                    KeyCode::Right => input.right(),
                    KeyCode::Home => input.home(),
                    KeyCode::End => input.end(),
                    KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                        input.insert(c)
                    }
                    _ => {}
                }
            }
        }
    }
    None
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_log = app
        .log_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_log {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(MOUSE_SCROLL_LINES),
        MouseEventKind::ScrollUp => app.scroll_up(MOUSE_SCROLL_LINES),
        _ => {}
    }
}
