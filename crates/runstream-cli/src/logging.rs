//! Tracing setup for the terminal client.
//!
//! Presets pick a base filter per `runstream::*` target, `--log` flags
//! override single targets and `RUST_LOG` replaces everything. Logs are
//! written to stderr; stdout belongs to the transcript.

use std::collections::BTreeMap;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const TARGET_PREFIX: &str = "runstream::";

/// Crates outside the workspace whose targets are passed through unprefixed.
const FOREIGN_TARGETS: [&str; 2] = ["tokio_tungstenite", "tungstenite"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Connection lifecycle and warnings
    #[default]
    Production,
    /// Adds run status transitions and frame traffic summaries
    Verbose,
    /// Everything but heartbeat pings
    Debug,
    Trace,
    /// Warnings and errors only
    Quiet,
}

impl LogPreset {
    /// Pick a preset from CLI flags. The most restrictive flag wins for
    /// quiet, otherwise the most detailed one.
    pub fn from_flags(verbose: bool, debug: bool, trace: bool, quiet: bool) -> Self {
        if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        }
    }

    fn directives(self) -> Vec<&'static str> {
        match self {
            LogPreset::Production => vec![
                "runstream::startup=info",
                "runstream::ws=info",
                "runstream::ws::ping=off",
                "runstream::run=warn",
                "runstream::store=warn",
                "runstream::visibility=warn",
                "runstream::plan=warn",
                "tungstenite=warn",
            ],
            LogPreset::Verbose => vec![
                "runstream=info",
                "runstream::ws::ping=off",
                "tungstenite=warn",
            ],
            LogPreset::Debug => vec![
                "runstream=debug",
                "runstream::ws::ping=off",
                "tungstenite=info",
            ],
            LogPreset::Trace => vec!["runstream=trace", "tungstenite=debug"],
            LogPreset::Quiet => vec!["runstream=warn", "tungstenite=error"],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Per-target level overrides, keyed by full target
    pub overrides: BTreeMap<String, Level>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Build from a preset and raw `--log target=level[,target=level]` values.
    /// Entries with an unknown level are skipped.
    pub fn new(preset: LogPreset, log_overrides: &[String], format: LogFormat) -> Self {
        let overrides = log_overrides
            .iter()
            .flat_map(|raw| raw.split(','))
            .filter_map(|part| {
                let (target, level) = part.split_once('=')?;
                Some((full_target(target.trim()), parse_level(level.trim())?))
            })
            .collect();

        Self {
            preset,
            overrides,
            format,
        }
    }

    /// The directive string used when `RUST_LOG` is unset.
    pub fn filter_directives(&self) -> String {
        let mut directives: Vec<String> =
            self.preset.directives().into_iter().map(String::from).collect();
        directives.extend(
            self.overrides
                .iter()
                .map(|(target, level)| format!("{}={}", target, level_to_str(*level))),
        );
        directives.join(",")
    }

    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }
        EnvFilter::try_new(self.filter_directives()).unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// `ws::ping` -> `runstream::ws::ping`; full and foreign targets pass through.
fn full_target(target: &str) -> String {
    if target == "runstream"
        || target.starts_with(TARGET_PREFIX)
        || FOREIGN_TARGETS.contains(&target)
    {
        target.to_string()
    } else {
        format!("{}{}", TARGET_PREFIX, target)
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn level_to_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Install the global subscriber.
pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
    }
}
