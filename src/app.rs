use std::path::PathBuf;

use ratatui::layout::Rect;
use tracing::{info, warn};

use crate::config::{effective_backend_url, Config};
use crate::plan::PlanResponse;
use crate::render::{render_response, sanitize_block, BubbleBody};
use crate::transport::TransportError;

pub const GREETING: &str = "Hi! Describe what you want to do and I'll pick the right tool.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Prompt,
    Backend,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Sending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub body: BubbleBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// Append-only chat history. Entries are never edited or removed.
#[derive(Debug, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn push(&mut self, role: ChatRole, body: BubbleBody) {
        self.messages.push(ChatMessage { role, body });
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Single-line text field with a character-indexed cursor.
#[derive(Debug, Default, Clone)]
pub struct LineInput {
    text: String,
    cursor: usize,
}

impl LineInput {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            cursor: text.chars().count(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.text, self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.text.chars().count() {
            let byte_pos = char_to_byte_index(&self.text, self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.text.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.chars().count();
    }

    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Everything a transport task needs for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub turn: u64,
    pub query: String,
    pub backend_url: String,
    pub stream: bool,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,
    pub status: Status,

    // Inputs
    pub prompt: LineInput,
    pub backend: LineInput,
    pub stream: bool,

    // Chat log
    pub log: ChatLog,
    pub log_scroll: u16,
    pub log_max_scroll: u16,
    pub log_height: u16,
    pub follow_log: bool,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Panel area for mouse hit-testing (updated during render)
    pub log_area: Option<Rect>,

    // Settings as stored on disk; only edits made here are written back
    saved: Config,
    config_path: Option<PathBuf>,
    committed_backend: Option<String>,
    next_turn: u64,
}

impl App {
    /// `config_path` is where setting changes are saved; `None` keeps them in memory.
    #[cfg(test)]
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        Self::with_settings(config.clone(), config, config_path)
    }

    /// Start from `effective` settings (saved file plus command-line
    /// overrides) while persisting edits on top of `saved`.
    pub fn with_settings(effective: Config, saved: Config, config_path: Option<PathBuf>) -> Self {
        let mut log = ChatLog::default();
        log.push(ChatRole::Assistant, BubbleBody::Text(GREETING.to_string()));

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Prompt,
            status: Status::Idle,

            prompt: LineInput::default(),
            backend: LineInput::with_text(effective.backend_url.as_deref().unwrap_or_default()),
            stream: effective.stream(),

            log,
            log_scroll: 0,
            log_max_scroll: 0,
            log_height: 0,
            follow_log: true,

            animation_frame: 0,
            log_area: None,

            saved,
            config_path,
            committed_backend: effective.backend_url,
            next_turn: 1,
        }
    }

    pub fn backend_url(&self) -> String {
        effective_backend_url(self.backend.text())
    }

    /// Move the prompt into the log and describe the request to make.
    /// Blank input is ignored and produces no request.
    pub fn submit(&mut self) -> Option<Submission> {
        let query = self.prompt.text().trim().to_string();
        if query.is_empty() {
            return None;
        }

        self.prompt.take();
        self.log.push(ChatRole::User, BubbleBody::Text(sanitize_block(&query)));
        self.status = Status::Sending;
        self.follow_log = true;

        let submission = Submission {
            turn: self.next_turn,
            query,
            backend_url: self.backend_url(),
            stream: self.stream,
        };
        self.next_turn += 1;

        info!(
            turn = submission.turn,
            backend = %submission.backend_url,
            stream = submission.stream,
            "submitting query"
        );
        Some(submission)
    }

    /// Record the outcome of a transport call. Any completion returns the
    /// status to idle, even if other requests are still in flight.
    pub fn finish_turn(&mut self, turn: u64, result: Result<PlanResponse, TransportError>) {
        match result {
            Ok(response) => {
                info!(turn, kind = response.kind(), "backend replied");
                for body in render_response(&response) {
                    self.log.push(ChatRole::Assistant, body);
                }
            }
            Err(err) => {
                warn!(turn, error = %err, "backend request failed");
                self.log.push(
                    ChatRole::Assistant,
                    BubbleBody::Text(sanitize_block(&format!("Error contacting backend: {}", err))),
                );
            }
        }

        self.status = Status::Idle;
    }

    pub fn toggle_stream(&mut self) {
        self.stream = !self.stream;
        self.saved.stream = Some(self.stream);
        self.save_config();
    }

    /// Save the backend field once the user has actually edited it.
    pub fn commit_backend(&mut self) {
        let text = self.backend.text().trim();
        let value = (!text.is_empty()).then(|| text.to_string());
        if value != self.committed_backend {
            self.committed_backend = value.clone();
            self.saved.backend_url = value;
            self.save_config();
        }
    }

    fn save_config(&self) {
        if let Some(path) = &self.config_path {
            match self.saved.save_to(path) {
                Ok(()) => info!(path = %path.display(), "saved settings"),
                Err(err) => warn!(path = %path.display(), error = %err, "failed to save settings"),
            }
        }
    }

    pub fn focus_next(&mut self) {
        if self.focus == FocusPane::Backend {
            self.commit_backend();
        }
        self.focus = match self.focus {
            FocusPane::Prompt => FocusPane::Backend,
            FocusPane::Backend => FocusPane::Log,
            FocusPane::Log => FocusPane::Prompt,
        };
        self.input_mode = match self.focus {
            FocusPane::Prompt | FocusPane::Backend => InputMode::Editing,
            FocusPane::Log => InputMode::Normal,
        };
    }

    pub fn focused_input(&mut self) -> Option<&mut LineInput> {
        match self.focus {
            FocusPane::Prompt => Some(&mut self.prompt),
            FocusPane::Backend => Some(&mut self.backend),
            FocusPane::Log => None,
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.status == Status::Sending {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Log scrolling
    pub fn scroll_down(&mut self, lines: u16) {
        self.log_scroll = self.log_scroll.saturating_add(lines).min(self.log_max_scroll);
        if self.log_scroll >= self.log_max_scroll {
            self.follow_log = true;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.log_scroll = self.log_scroll.saturating_sub(lines);
        self.follow_log = false;
    }

    pub fn scroll_top(&mut self) {
        self.log_scroll = 0;
        self.follow_log = false;
    }

    pub fn scroll_bottom(&mut self) {
        self.log_scroll = self.log_max_scroll;
        self.follow_log = true;
    }

    pub fn half_page(&self) -> u16 {
        (self.log_height / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BACKEND_URL;
    use serde_json::json;

    fn app() -> App {
        App::new(Config::default(), None)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.prompt.insert(c);
        }
    }

    fn texts(app: &App) -> Vec<(ChatRole, String)> {
        app.log
            .messages()
            .iter()
            .filter_map(|m| match &m.body {
                BubbleBody::Text(text) => Some((m.role, text.clone())),
                BubbleBody::Table(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_starts_with_greeting() {
        let app = app();
        assert_eq!(texts(&app), vec![(ChatRole::Assistant, GREETING.to_string())]);
        assert_eq!(app.status, Status::Idle);
    }

    #[test]
    fn test_submit_appends_one_user_bubble() {
        let mut app = app();
        type_text(&mut app, "  book a flight to NYC \n");

        let submission = app.submit().unwrap();
        assert_eq!(submission.query, "book a flight to NYC");
        assert_eq!(submission.backend_url, DEFAULT_BACKEND_URL);
        assert!(!submission.stream);
        assert_eq!(app.log.len(), 2);
        assert_eq!(
            texts(&app)[1],
            (ChatRole::User, "book a flight to NYC".to_string())
        );
        assert_eq!(app.prompt.text(), "");
        assert_eq!(app.status, Status::Sending);
    }

    #[test]
    fn test_blank_input_does_nothing() {
        let mut app = app();
        type_text(&mut app, " \t \n ");

        assert_eq!(app.submit(), None);
        assert_eq!(app.log.len(), 1);
        assert_eq!(app.status, Status::Idle);
        assert_eq!(app.prompt.text(), " \t \n ");
    }

    #[test]
    fn test_submission_uses_current_settings() {
        let mut app = App::new(
            Config {
                backend_url: Some("http://planner:9000/api/query".to_string()),
                stream: Some(true),
                timeout_secs: None,
            },
            None,
        );
        type_text(&mut app, "hello");
        let first = app.submit().unwrap();
        assert_eq!(first.backend_url, "http://planner:9000/api/query");
        assert!(first.stream);

        app.toggle_stream();
        app.backend.take();
        type_text(&mut app, "again");
        let second = app.submit().unwrap();
        assert_eq!(second.backend_url, DEFAULT_BACKEND_URL);
        assert!(!second.stream);
        assert_eq!(second.turn, first.turn + 1);
    }

    #[test]
    fn test_http_error_becomes_one_bubble() {
        let mut app = app();
        type_text(&mut app, "hello");
        let submission = app.submit().unwrap();

        app.finish_turn(submission.turn, Err(TransportError::Http(503)));
        assert_eq!(app.log.len(), 3);
        assert_eq!(
            texts(&app)[2],
            (
                ChatRole::Assistant,
                "Error contacting backend: HTTP 503".to_string()
            )
        );
        assert_eq!(app.status, Status::Idle);

        // Still usable afterwards.
        type_text(&mut app, "retry");
        assert!(app.submit().is_some());
    }

    #[test]
    fn test_plan_reply_appends_tables() {
        let mut app = app();
        type_text(&mut app, "hello");
        let submission = app.submit().unwrap();

        let response = PlanResponse::from_json(json!({
            "candidates": [{"name": "A"}],
            "plan": {"steps": [{"name": "A"}]}
        }));
        app.finish_turn(submission.turn, Ok(response));

        let roles: Vec<_> = app.log.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::Assistant, ChatRole::User, ChatRole::Assistant, ChatRole::Assistant]
        );
        assert!(matches!(app.log.messages()[2].body, BubbleBody::Table(_)));
        assert_eq!(app.status, Status::Idle);
    }

    #[test]
    fn test_overlapping_turns_last_settle_wins() {
        let mut app = app();
        type_text(&mut app, "one");
        let first = app.submit().unwrap();
        type_text(&mut app, "two");
        let second = app.submit().unwrap();

        app.finish_turn(second.turn, Ok(PlanResponse::RawText("second".to_string())));
        assert_eq!(app.status, Status::Idle);
        app.finish_turn(first.turn, Ok(PlanResponse::RawText("first".to_string())));

        let replies: Vec<_> = texts(&app).into_iter().skip(3).map(|(_, t)| t).collect();
        assert_eq!(replies, vec!["second", "first"]);
    }

    #[test]
    fn test_settings_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut app = App::new(Config::default(), Some(path.clone()));

        app.toggle_stream();
        app.focus = FocusPane::Backend;
        for c in "http://h:1/q".chars() {
            app.backend.insert(c);
        }
        app.focus_next();

        let saved = Config::load_from(&path).unwrap();
        assert_eq!(saved.stream, Some(true));
        assert_eq!(saved.backend_url.as_deref(), Some("http://h:1/q"));
        assert_eq!(app.focus, FocusPane::Log);
        assert_eq!(app.input_mode, InputMode::Normal);
    }

    #[test]
    fn test_line_input_editing() {
        let mut input = LineInput::with_text("héllo");
        input.home();
        input.right();
        input.delete();
        input.insert('e');
        input.end();
        input.backspace();
        assert_eq!(input.text(), "hell");
        assert_eq!(input.cursor(), 4);
        input.left();
        input.left();
        input.insert('-');
        assert_eq!(input.text(), "he-ll");
    }

    #[test]
    fn test_scrolling_follows_tail() {
        let mut app = app();
        app.log_max_scroll = 10;
        app.scroll_up(3);
        assert!(!app.follow_log);
        app.scroll_down(20);
        assert_eq!(app.log_scroll, 10);
        assert!(app.follow_log);
        app.scroll_top();
        assert_eq!(app.log_scroll, 0);
        assert!(!app.follow_log);
    }

    #[test]
    fn test_reply_keeps_scrolled_up_position() {
        let mut app = app();
        app.log_max_scroll = 10;
        app.scroll_bottom();
        app.scroll_up(4);

        app.finish_turn(1, Ok(PlanResponse::RawText("late reply".to_string())));
        assert!(!app.follow_log);
        assert_eq!(app.log_scroll, 6);

        type_text(&mut app, "next");
        app.submit();
        assert!(app.follow_log);
    }

    #[test]
    fn test_command_line_overrides_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let saved = Config {
            backend_url: Some("http://disk:8000/api/query".to_string()),
            stream: Some(false),
            timeout_secs: Some(20),
        };
        let effective = Config {
            backend_url: Some("http://tmp:1/q".to_string()),
            ..saved.clone()
        };
        let mut app = App::with_settings(effective, saved, Some(path.clone()));
        assert_eq!(app.backend_url(), "http://tmp:1/q");

        app.toggle_stream();
        app.focus = FocusPane::Backend;
        app.focus_next();

        let on_disk = Config::load_from(&path).unwrap();
        assert_eq!(on_disk.backend_url.as_deref(), Some("http://disk:8000/api/query"));
        assert_eq!(on_disk.stream, Some(true));
        assert_eq!(on_disk.timeout_secs, Some(20));

        // An actual edit of the field is saved.
        app.backend.take();
        for c in "http://new:2/q".chars() {
            app.backend.insert(c);
        }
        app.commit_backend();
        let on_disk = Config::load_from(&path).unwrap();
        assert_eq!(on_disk.backend_url.as_deref(), Some("http://new:2/q"));
    }
}
