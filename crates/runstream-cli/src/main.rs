//! Runstream - terminal client for agent team runs.

use anyhow::Result;
use clap::Parser;
use runstream_cli::config::Config;
use runstream_cli::logging::{self, LogConfig, LogFormat, LogPreset};
use runstream_cli::prompt::{spawn_stdin_reader, Input};
use runstream_cli::render::Renderer;
use runstream_cli::socket::WsProvider;
use runstream_core::{EngineError, RunEvent, SessionController};
use runstream_types::{ReportedStatus, SessionId};
use std::path::PathBuf;

/// Runstream - drive an agent team run from the terminal.
#[derive(Parser, Debug)]
#[command(name = "runstream")]
#[command(about = "Terminal client for agent team runs over WebSocket")]
#[command(version)]
struct Cli {
    /// Task to start; read from the prompt when omitted
    query: Option<String>,

    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the socket endpoint from config
    #[arg(long, value_name = "URL")]
    server_url: Option<String>,

    /// Override the session id from config
    #[arg(short, long)]
    session: Option<SessionId>,

    /// Exit once the run completes, fails or stops
    #[arg(long)]
    once: bool,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (DEBUG level, excludes ping traces)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "run=debug" or "ws::ping=trace").
    /// Can be specified multiple times. Targets are prefixed with "runstream::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let preset = LogPreset::from_flags(cli.verbose, cli.debug, cli.trace, cli.quiet);
    logging::init(&LogConfig::new(preset, &cli.log_overrides, cli.log_format));

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }
    if let Some(session) = cli.session {
        config.session_id = session;
    }
    tracing::info!(
        target: "runstream::startup",
        "Loaded configuration (server: {}, session: {})",
        config.server_url,
        config.session_id
    );

    let (controller, mut events) = SessionController::new(
        WsProvider::new(&config.server_url),
        config.connection(),
        config.session_id,
        config.team_config.clone(),
        config.settings.clone(),
    );
    tracing::info!(target: "runstream::startup", run_id = %controller.run_id(), "Run minted");
    let (handle, task) = controller.spawn();

    let mut renderer = Renderer::new(std::io::stdout());
    let mut lines = spawn_stdin_reader();

    if let Some(query) = cli.query {
        // Transport failures reach the transcript as local errors
        if let Err(e) = handle.start(query).await {
            tracing::debug!(target: "runstream::startup", "Start failed: {}", e);
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                renderer.render(&event)?;
                if cli.once && is_finished(&event) {
                    break;
                }
            }
            line = lines.recv() => {
                let Some(line) = line else { break };
                let Some(input) = Input::parse(&line) else { continue };
                if input == Input::Quit {
                    break;
                }
                if let Input::Unknown(word) = &input {
                    eprintln!("unknown command: /{}", word);
                    continue;
                }
                let Some(command) = input.into_command() else { continue };
                match handle.send(command).await {
                    Ok(()) => {}
                    Err(EngineError::ChannelSend) => break,
                    Err(e) => tracing::debug!(target: "runstream::ws", "Command failed: {}", e),
                }
            }
        }
    }

    renderer.flush()?;
    if handle.shutdown().await.is_err() {
        tracing::debug!(target: "runstream::startup", "Controller already stopped");
    }
    task.await?;
    Ok(())
}

fn is_finished(event: &RunEvent) -> bool {
    matches!(event, RunEvent::StatusChanged(ReportedStatus::Stored(status)) if status.is_terminal())
}
