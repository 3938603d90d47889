mod api;
mod config;
mod receiver;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use drone_world_core::{
    playback::{Playback, Tick},
    protocol::EpisodeId,
    world::World,
};
use ratatui::{
    crossterm::{
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
};
use std::{
    fs::File,
    io::{self, Stdout},
    path::Path,
    sync::{Mutex, mpsc},
    time::{Duration, Instant},
};
use tracing::{error, info, trace, warn};

use crate::{
    api::{ServerApi, stream_url},
    config::{Args, ClientConfig},
    receiver::{ReceiverHandle, WsFrameSource},
    ui::StatusLine,
};

/// Socket read timeout; bounds how long a shutdown request can go unnoticed.
const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Redraw rate of the UI, independent of the playback pace.
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

enum LinkStatus {
    Streaming,
    Closed,
    Failed(String),
}

struct App {
    world: World,
    playback: Playback,
    episode: EpisodeId,
    inbound: mpsc::Receiver<String>,
    receiver: Option<ReceiverHandle>,
    link: LinkStatus,
    dropped: u64,
    should_quit: bool,
}

impl App {
    fn new(
        world: World,
        playback: Playback,
        episode: EpisodeId,
        inbound: mpsc::Receiver<String>,
        receiver: ReceiverHandle,
    ) -> Self {
        App {
            world,
            playback,
            episode,
            inbound,
            receiver: Some(receiver),
            link: LinkStatus::Streaming,
            dropped: 0,
            should_quit: false,
        }
    }

    /// Moves every message the receiver has delivered into playback.
    fn pump(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(text) => match self.playback.route_raw(&text, &mut self.world) {
                    Ok(routed) => trace!(?routed, "Routed stream message"),
                    Err(err) => {
                        self.dropped += 1;
                        warn!(error = %err, "Dropping malformed stream message");
                    }
                },
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.finish_link();
                    break;
                }
            }
        }
    }

    fn finish_link(&mut self) {
        let Some(handle) = self.receiver.take() else {
            return;
        };
        self.link = match handle.join() {
            Ok(()) => LinkStatus::Closed,
            Err(err) => {
                let err = anyhow::Error::from(err);
                error!("Episode stream ended with an error: {err:#}");
                LinkStatus::Failed(format!("{err:#}"))
            }
        };
    }

    /// Handles one step of playback.
    fn tick(&mut self, now: Instant) {
        if let Tick::Advanced(report) = self.playback.tick(now, &mut self.world) {
            trace!(
                step = report.step_index,
                changes = report.marker_changes.len(),
                "Rendered step"
            );
        }
    }

    fn status(&self) -> StatusLine {
        let link = match &self.link {
            LinkStatus::Streaming => "streaming".to_string(),
            LinkStatus::Closed => "closed".to_string(),
            LinkStatus::Failed(reason) => format!("failed: {reason}"),
        };
        StatusLine {
            episode: self.episode.to_string(),
            link,
            queued: self.playback.queue_len(),
            dropped: self.dropped,
        }
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }

    /// Stops the receiver thread and releases the socket.
    fn shutdown(&mut self) {
        if let Some(handle) = self.receiver.take() {
            match handle.shutdown() {
                Ok(()) => info!("Receiver stopped"),
                Err(err) => warn!(error = %err, "Receiver stopped with an error"),
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ClientConfig::load(&args)?;
    init_tracing(&config.log_file)?;
    info!(
        http = %config.http_base,
        stream = %config.stream_base,
        pacing_ms = config.pacing.interval.as_millis() as u64,
        "Starting drone world viewer"
    );

    let api = ServerApi::new(&config.http_base, config.request_timeout)?;
    let init = api.fetch_init().context("initialization query failed")?;
    let world = World::from_init(&init).context("invalid initialization payload")?;
    let start = api.start_episode().context("could not start an episode")?;

    let url = stream_url(&config.stream_base, &start.episode_id);
    let source = WsFrameSource::connect(&url, STREAM_READ_TIMEOUT)
        .context("could not open the episode stream")?;
    let (tx, rx) = mpsc::channel();
    let receiver = receiver::spawn(source, tx).context("could not start the receiver thread")?;

    let mut app = App::new(
        world,
        Playback::new(config.pacing),
        start.episode_id,
        rx,
        receiver,
    );

    let mut terminal = setup_terminal()?;
    let outcome = run_app(&mut terminal, &mut app);
    app.shutdown();
    restore_terminal(&mut terminal)?;

    outcome
}

/// Sends log output to `path`, filtered by `RUST_LOG` (default `info`).
fn init_tracing(path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to install the log subscriber")
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let mut last_frame = Instant::now();

    loop {
        let now = Instant::now();
        app.pump();
        app.tick(now);

        let status = app.status();
        terminal.draw(|f| ui::draw(f, &app.world, &status, now))?;

        let timeout = FRAME_INTERVAL
            .checked_sub(last_frame.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                    _ => {}
                }
            }
        }
        last_frame = Instant::now();

        if app.should_quit {
            break;
        }
    }
    Ok(())
}
