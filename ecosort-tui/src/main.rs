//! Terminal kiosk for EcoSort: finds the backend, follows detections, and shows which bin is open.

mod app;
mod commands;
mod input;
mod ui;

use std::{
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, Event as CEvent, KeyEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ecosort_backend as backend;
use ecosort_core::{
    config::{ENV_CONFIG, KioskConfig},
    model::Endpoint,
    plugin::BackendPlugin,
    service::{SortingService, queue_sink},
    source::DetectionSource,
};
use ratatui::{Terminal, backend::CrosstermBackend};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::input::Action;

const INPUT_POLL: StdDuration = StdDuration::from_millis(100);
const REDRAW_INTERVAL: StdDuration = StdDuration::from_millis(250);
/// Client-wide request bound; uploads set their own, longer one.
const HTTP_TIMEOUT: StdDuration = StdDuration::from_millis(15_000);
const USER_AGENT: &str = "ecosort/0.1";

#[derive(Debug, Parser)]
#[command(name = "ecosort", version, about = "EcoSort waste sorting kiosk")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Skip discovery and use this backend (`host[:port]`)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Log file for the kiosk display
    #[arg(long, global = true, default_value = "ecosort.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the kiosk display (default)
    Kiosk,
    /// Probe every candidate and report the one discovery would pick
    Discover,
    /// Print the backend's camera stream state
    Status,
    /// Classify an image file and show which bin it would open
    Classify {
        /// Image to upload
        image: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Cli {
        config,
        backend: pinned,
        log_file,
        command,
    } = Cli::parse();
    let command = command.unwrap_or(Command::Kiosk);

    init_logging(matches!(command, Command::Kiosk).then_some(log_file.as_path()))?;

    let mut config = KioskConfig::load(config.as_deref()).context("loading configuration")?;
    if let Some(raw) = pinned.as_deref() {
        config.backend.pinned = Some(
            Endpoint::parse_with_default_port(raw, config.backend.port)
                .with_context(|| format!("invalid --backend {raw:?}"))?,
        );
    }

    // HTTP + plugin setup
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()?;
    let plugin = backend::plugin(client.clone());

    match command {
        Command::Kiosk => kiosk(&config, plugin).await,
        Command::Discover => commands::discover(&config, &plugin).await,
        Command::Status => commands::status(&config, &plugin, &client).await,
        Command::Classify { image } => {
            commands::classify(&config, &plugin, &client, &image).await
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // the kiosk owns the terminal, so its logs go to a file
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

async fn kiosk(config: &KioskConfig, plugin: BackendPlugin) -> Result<()> {
    let locator = commands::locator(config, &plugin);
    let endpoint = commands::resolve_endpoint(config, &locator).await;
    let verified = locator.verify(&endpoint).await;
    info!(%endpoint, verified, "backend selected");

    // Controller loop consuming both feeds
    let service = Arc::new(SortingService::from_config(config));
    let (queue, batches) = mpsc::unbounded_channel();
    let consumer = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.run(batches).await }
    });

    let source = DetectionSource::new(plugin);
    let feeds = source.start(&endpoint, queue_sink(queue), config.feeds);

    // App state
    let mut app = App::new(
        Arc::clone(&service),
        endpoint,
        config.feeds,
        source.channel_status(),
        source.frames(),
    );
    app.verified = verified;
    if !verified {
        app.error_message =
            Some("Backend did not pass the health check; feeds keep retrying".into());
    }

    // Terminal init
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run event loop
    let res = run(&mut terminal, app, spawn_key_reader()).await;

    feeds.stop();
    consumer.abort();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

/// Read terminal keys on a blocking thread so the feeds keep running between key presses.
fn spawn_key_reader() -> mpsc::UnboundedReceiver<KeyEvent> {
    let (keys, receiver) = mpsc::unbounded_channel();
    spawn_blocking(move || {
        while !keys.is_closed() {
            match event::poll(INPUT_POLL) {
                Ok(false) => {}
                Ok(true) => match event::read() {
                    Ok(CEvent::Key(key)) => {
                        if keys.send(key).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "terminal read failed");
                        break;
                    }
                },
                Err(err) => {
                    warn!(error = %err, "terminal poll failed");
                    break;
                }
            }
        }
    });
    receiver
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut app: App,
    mut keys: mpsc::UnboundedReceiver<KeyEvent>,
) -> Result<()> {
    let mut board = app.service.subscribe_bin_states();
    let mut redraw = interval(REDRAW_INTERVAL);

    loop {
        // Draw current UI
        app.refresh();
        terminal.draw(|frame| ui::draw(frame, &app))?;

        tokio::select! {
            key = keys.recv() => {
                let Some(key) = key else {
                    break;
                };
                match input::handle_key_event(key, &mut app) {
                    Action::Quit => break,
                    Action::None => {}
                    Action::AssignBin(bin) => app.assign_selected(bin),
                }
            }
            changed = board.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = redraw.tick() => {}
        }
    }

    info!("kiosk display closed");
    Ok(())
}
