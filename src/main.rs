use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::{info, warn};

mod app;
mod config;
mod handler;
mod logging;
mod plan;
mod render;
mod transport;
mod tui;
mod ui;

use app::App;
use config::Config;
use handler::Dispatcher;
use render::{table_lines, BubbleBody, TableLine};
use transport::BackendClient;
use tui::{EventHandler, Tui};

#[derive(Parser)]
#[command(name = "planchat", version)]
#[command(about = "Chat with a tool-selection planning backend")]
struct Cli {
    /// Backend endpoint (defaults to the saved setting, then http://localhost:8000/api/query)
    #[arg(short, long, global = true)]
    backend: Option<String>,
    /// Ask the backend for a streamed response
    #[arg(long, global = true, conflicts_with = "no_stream")]
    stream: bool,
    /// Ask the backend for a single JSON response
    #[arg(long, global = true)]
    no_stream: bool,
    /// Where to write logs in interactive mode
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one query and print the plan
    Ask {
        /// What you want to do
        query: String,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(backend) = &self.backend {
            config.backend_url = Some(backend.clone());
        }
        if self.stream {
            config.stream = Some(true);
        } else if self.no_stream {
            config.stream = Some(false);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Ask { query }) => {
            logging::init_stderr()?;
            let settings = load_settings(&cli);
            ask(&settings.effective, query).await
        }
        None => {
            let log_path = logging::init_file(cli.log_file.clone())?;
            info!(log = %log_path.display(), "starting planchat v{}", env!("CARGO_PKG_VERSION"));
            run_tui(load_settings(&cli)).await
        }
    }
}

struct Settings {
    /// What is on disk; the TUI writes its edits on top of this.
    saved: Config,
    /// `saved` with command-line overrides applied.
    effective: Config,
    path: Option<PathBuf>,
}

/// A broken config file is reported and replaced by defaults rather than
/// stopping startup.
fn load_settings(cli: &Cli) -> Settings {
    let config_path = match Config::default_path() {
        Ok(path) => Some(path),
        Err(err) => {
            warn!(error = %err, "settings will not be saved");
            None
        }
    };

    let saved = match &config_path {
        Some(path) => Config::load_from(path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "ignoring unreadable config");
            Config::default()
        }),
        None => Config::default(),
    };
    let mut effective = saved.clone();
    cli.apply_overrides(&mut effective);

    info!(
        backend = %effective.backend_url(),
        stream = effective.stream(),
        timeout_secs = ?effective.timeout_secs,
        "loaded configuration"
    );
    Settings {
        saved,
        effective,
        path: config_path,
    }
}

async fn run_tui(settings: Settings) -> Result<()> {
    let client = BackendClient::new(settings.effective.timeout())?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let dispatcher = Dispatcher::new(client, events.sender());
    let mut app = App::with_settings(settings.effective, settings.saved, settings.path);

    let result = run_loop(&mut terminal, &mut app, &mut events, &dispatcher).await;

    tui::restore()?;
    info!("exiting");
    result
}

async fn run_loop(
    terminal: &mut Tui,
    app: &mut App,
    events: &mut EventHandler,
    dispatcher: &Dispatcher,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, dispatcher, event),
            None => break,
        }
    }
    Ok(())
}

async fn ask(config: &Config, query: &str) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        bail!("Query must not be empty");
    }

    let client = BackendClient::new(config.timeout())?;
    let backend = config.backend_url();
    println!("🔍 Asking {} ...\n", backend.dimmed());

    let response = client
        .query(&backend, query, config.stream())
        .await
        .map_err(|err| anyhow!("Error contacting backend: {}", err))?;
    info!(kind = response.kind(), "backend replied");

    for body in render::render_response(&response) {
        print_bubble(&body);
    }
    Ok(())
}

fn print_bubble(body: &BubbleBody) {
    match body {
        BubbleBody::Text(text) => println!("{}\n", text),
        BubbleBody::Table(table) => {
            for line in table_lines(table, usize::MAX) {
                match line {
                    TableLine::Title(text) => println!("{}", text.bold().blue()),
                    TableLine::Header(text) => println!("{}", text.bold()),
                    TableLine::Rule(text) => println!("{}", text.dimmed()),
                    TableLine::Row(text) => println!("{}", text),
                    TableLine::Caption(text) => println!("{}", text.italic().dimmed()),
                }
            }
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved() -> Config {
        Config {
            backend_url: Some("http://saved:8000/api/query".to_string()),
            stream: Some(true),
            timeout_secs: Some(30),
        }
    }

    #[test]
    fn test_flags_override_saved_settings() {
        let cli = Cli::try_parse_from(["planchat", "--backend", "http://cli:1/q", "--no-stream"]).unwrap();
        let mut config = saved();
        cli.apply_overrides(&mut config);

        assert_eq!(config.backend_url(), "http://cli:1/q");
        assert!(!config.stream());
        assert_eq!(config.timeout_secs, Some(30));
    }

    #[test]
    fn test_no_flags_keep_saved_settings() {
        let cli = Cli::try_parse_from(["planchat"]).unwrap();
        let mut config = saved();
        cli.apply_overrides(&mut config);

        assert_eq!(config.backend_url(), "http://saved:8000/api/query");
        assert!(config.stream());
    }

    #[test]
    fn test_ask_accepts_global_flags() {
        let cli = Cli::try_parse_from(["planchat", "ask", "book a hotel", "--stream", "-b", "http://x/q"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Ask { ref query }) if query == "book a hotel"));
        assert!(cli.stream);
        assert_eq!(cli.backend.as_deref(), Some("http://x/q"));
    }

    #[test]
    fn test_stream_flags_conflict() {
        assert!(Cli::try_parse_from(["planchat", "--stream", "--no-stream"]).is_err());
    }
}
