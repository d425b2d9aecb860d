//! Tracing setup
//!
//! Structured logging through `tracing` and `tracing-subscriber`:
//! - pretty, compact or JSON output
//! - `RUST_LOG` overrides the configured level
//! - idempotent initialisation, so tests and the CLI can both call it
//!
//! # Example
//! ```no_run
//! use scimitar::{config::ScanConfig, logging};
//!
//! let config = ScanConfig::load_from("config/scimitar.toml")?;
//! logging::init_from_config(&config)?;
//! tracing::info!("Scan started");
//! # Ok::<(), scimitar::error::ScanError>(())
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    Pretty,
    /// One line per event, no colours
    Compact,
    /// One JSON object per event
    Json,
}

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level, overridden by `RUST_LOG`
    pub level: Level,
    /// Line format
    pub format: OutputFormat,
    /// Emit span open/close events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// Only used by the pretty format
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Compact output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level from `[application] log_level`
    pub fn from_config(config: &ScanConfig) -> ScanResult<Self> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    /// Set the line format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Emit span open and close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Colour pretty output.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the subscriber at the configured level.
pub fn init_from_config(config: &ScanConfig) -> ScanResult<()> {
    init(LoggingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` if a subscriber is already installed.
pub fn init(config: LoggingConfig) -> ScanResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        OutputFormat::Pretty => install(
            fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter),
        ),
        OutputFormat::Compact => install(
            fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(false)
                .with_filter(env_filter),
        ),
        OutputFormat::Json => install(
            fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_filter(env_filter),
        ),
    }
}

fn install<L>(layer: L) -> ScanResult<()>
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            // Already initialised (tests, or a host application)
            if e
                .to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(ScanError::configuration(format!(
                    "Failed to initialize tracing: {}",
                    e
                )))
            }
        })
}

/// Parse a log level name, case-insensitively
pub fn parse_log_level(level: &str) -> ScanResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(ScanError::configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}
