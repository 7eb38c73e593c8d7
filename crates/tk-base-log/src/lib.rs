//! Logging infrastructure for tk-base.
//!
//! Subscriber setup, log levels with category levels, call-origin resolution
//! and call-logging wrappers.
//!
//! [`init`] installs the global subscriber once and returns a [`LogHandle`];
//! the handle changes the active threshold later without reinstalling it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::{Layered as SubscriberLayered, SubscriberExt},
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub mod discover;
pub mod levels;
pub mod origin;
pub mod spans;
pub mod wrapper;

pub use discover::{find_config_file, find_project_root, DEFAULT_CONFIG_FILE, ROOT_MARKERS};
pub use levels::{LevelThreshold, LogLevel, ParseLevelError, CATEGORY_TARGET_PREFIX};
pub use origin::{resolve_origin, Frame, FrameKind, ResolvedOrigin, SkipSet};
pub use wrapper::{
    create_logger_wrapper, default_logger, logger_wrapper, CallArgs, CallLogger, Layered,
    LogMode, LoggerWrapper,
};

/// Convenience macros re-exported from tracing.
pub use tracing::{debug, error, info, trace, warn};

#[doc(hidden)]
pub use tracing as __tracing;

/// Environment variable names read by [`LogConfig::from_env`].
pub mod vars {
    pub const LOG_LEVEL: &str = "TK_LOG_LEVEL";
    pub const LOG_FORMAT: &str = "TK_LOG_FORMAT";
    pub const LOG_FILE: &str = "TK_LOG_FILE";
    pub const LOG_SOURCE: &str = "TK_LOG_SOURCE";
    pub const LOG_SPANS: &str = "TK_LOG_SPANS";
    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Log file path (if file logging enabled).
    pub file_path: Option<PathBuf>,
    /// Include timestamps.
    pub timestamps: bool,
    /// Include source location.
    pub source_location: bool,
    /// Include span events.
    pub span_events: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON structured format.
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            file_path: None,
            timestamps: true,
            source_location: false,
            span_events: false,
        }
    }
}

/// `logging:` section of a config file. Absent keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    level: Option<LogLevel>,
    format: Option<LogFormat>,
    file_path: Option<PathBuf>,
    timestamps: Option<bool>,
    source_location: Option<bool>,
    span_events: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogFile {
    logging: LoggingSection,
}

fn flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var(vars::LOG_LEVEL) {
            if let Some(l) = LogLevel::parse(&level) {
                config.level = l;
            }
        } else if let Ok(level) = std::env::var(vars::RUST_LOG) {
            if let Some(l) = LogLevel::parse(&level) {
                config.level = l;
            }
        }

        if let Ok(format) = std::env::var(vars::LOG_FORMAT) {
            config.format = LogFormat::parse(&format);
        }

        if let Ok(file_path) = std::env::var(vars::LOG_FILE) {
            config.file_path = Some(PathBuf::from(file_path));
        }

        if let Ok(source_location) = std::env::var(vars::LOG_SOURCE) {
            config.source_location = flag(&source_location);
        }

        if let Ok(span_events) = std::env::var(vars::LOG_SPANS) {
            config.span_events = flag(&span_events);
        }

        config
    }

    /// Parse the `logging:` section of a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, LogError> {
        let file: LogFile = serde_yaml::from_str(contents).map_err(|e| LogError::Parse {
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })?;

        let section = file.logging;
        let defaults = Self::default();
        Ok(Self {
            level: section.level.unwrap_or(defaults.level),
            format: section.format.unwrap_or(defaults.format),
            file_path: section.file_path,
            timestamps: section.timestamps.unwrap_or(defaults.timestamps),
            source_location: section.source_location.unwrap_or(defaults.source_location),
            span_events: section.span_events.unwrap_or(defaults.span_events),
        })
    }

    /// Load from a YAML config file; a missing file yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Load from the nearest `file_name` found by walking up from `start`.
    ///
    /// Yields the defaults when no directory up to the filesystem root holds
    /// the file.
    pub fn discover(
        file_name: impl AsRef<Path>,
        start: impl AsRef<Path>,
    ) -> Result<Self, LogError> {
        match find_config_file(file_name, start) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

fn fmt_layer<S, W>(
    config: &LogConfig,
    writer: W,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(config.span_events());

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => layer.boxed(),
        (LogFormat::Pretty, false) => layer.without_time().boxed(),
        (LogFormat::Compact, true) => layer.compact().boxed(),
        (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
        (LogFormat::Json, true) => layer.json().boxed(),
        (LogFormat::Json, false) => layer.json().without_time().boxed(),
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LogError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(file)
}

type ThresholdHandle = reload::Handle<LevelThreshold, SubscriberLayered<EnvFilter, Registry>>;

/// Handle to the threshold of the subscriber installed by [`init`].
#[derive(Clone)]
pub struct LogHandle {
    threshold: ThresholdHandle,
    initial: LogLevel,
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("initial", &self.initial)
            .field("level", &self.level().ok())
            .finish()
    }
}

impl LogHandle {
    /// The threshold currently applied.
    pub fn level(&self) -> Result<LogLevel, LogError> {
        self.threshold
            .with_current(|threshold| threshold.level())
            .map_err(|e| LogError::Reload(e.to_string()))
    }

    /// Replace the threshold.
    pub fn set_level(&self, level: LogLevel) -> Result<(), LogError> {
        self.threshold
            .reload(LevelThreshold::new(level))
            .map_err(|e| LogError::Reload(e.to_string()))
    }

    /// Re-read a config file and apply its level.
    ///
    /// Output format and destinations are fixed when the subscriber is
    /// installed; only the threshold follows the file.
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<LogConfig, LogError> {
        let config = LogConfig::from_file(path)?;
        self.set_level(config.level)?;
        Ok(config)
    }

    /// Go back to the threshold chosen at [`init`].
    pub fn reset(&self) -> Result<(), LogError> {
        self.set_level(self.initial)
    }
}

/// Initialize logging with the given configuration.
///
/// Logs go to stderr and, when `file_path` is set, are appended to that file.
/// Without `RUST_LOG` the threshold is `level`, compared by severity so
/// category levels filter each other. When `RUST_LOG` is set its directives
/// decide and the threshold starts wide open.
pub fn init(config: LogConfig) -> Result<LogHandle, LogError> {
    let (filter, initial) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, LogLevel::Trace),
        Err(_) => (EnvFilter::new("trace"), config.level),
    };
    let (threshold, handle) = reload::Layer::new(LevelThreshold::new(initial));

    let file_layer = match &config.file_path {
        Some(path) => Some(fmt_layer(&config, Mutex::new(open_log_file(path)?), false)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(threshold)
        .with(fmt_layer(&config, io::stderr, true))
        .with(file_layer)
        .try_init()
        .map_err(|e| LogError::InitError(e.to_string()))?;

    Ok(LogHandle {
        threshold: handle,
        initial,
    })
}

/// Logging errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to initialize logging: {0}")]
    InitError(String),

    #[error("failed to open log file: {0}")]
    FileError(#[from] io::Error),

    #[error("invalid logging config at line {}: {message}", display_line(*line))]
    Parse { line: Option<usize>, message: String },

    #[error("failed to reload log threshold: {0}")]
    Reload(String),
}

fn display_line(line: Option<usize>) -> String {
    line.map(|l| l.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
