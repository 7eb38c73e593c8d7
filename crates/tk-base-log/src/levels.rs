//! Log levels, including the category levels that sit between DEBUG and INFO.
//!
//! `tracing` only knows five levels. Category levels (`INFO_CONFIG` through
//! `INFO_CONTROL`) let components tag informational output by subsystem so a
//! threshold like `INFO_UTILS` can silence noisier categories while keeping
//! the rest. They are emitted as DEBUG events carrying a `category` field
//! under a per-category target, and [`LevelThreshold`] recovers the category
//! from that target so thresholds compare full severities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use tracing::{Metadata, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer};

/// Target prefix of events emitted at a category level, followed by the
/// level name (`tk_base::category::INFO_UTILS`).
pub const CATEGORY_TARGET_PREFIX: &str = "tk_base::category::";

/// Log level.
///
/// Ordering follows severity: `Trace < Debug < Info* categories < Info < Warn < Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Trace,
    Debug,
    InfoConfig,
    InfoUtils,
    InfoDatabase,
    InfoKernel,
    InfoCore,
    InfoService,
    InfoControl,
    #[default]
    Info,
    Warn,
    Error,
}

const CUSTOM_LEVELS: [LogLevel; 7] = [
    LogLevel::InfoConfig,
    LogLevel::InfoUtils,
    LogLevel::InfoDatabase,
    LogLevel::InfoKernel,
    LogLevel::InfoCore,
    LogLevel::InfoService,
    LogLevel::InfoControl,
];

impl LogLevel {
    /// Parse from string. Case-insensitive; accepts `warning` for `Warn`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info_config" => Some(Self::InfoConfig),
            "info_utils" => Some(Self::InfoUtils),
            "info_database" => Some(Self::InfoDatabase),
            "info_kernel" => Some(Self::InfoKernel),
            "info_core" => Some(Self::InfoCore),
            "info_service" => Some(Self::InfoService),
            "info_control" => Some(Self::InfoControl),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    /// Numeric severity (DEBUG=10, categories 11-17, INFO=20, WARN=30, ERROR=40).
    pub fn severity(self) -> u8 {
        match self {
            Self::Trace => 5,
            Self::Debug => 10,
            Self::InfoConfig => 11,
            Self::InfoUtils => 12,
            Self::InfoDatabase => 13,
            Self::InfoKernel => 14,
            Self::InfoCore => 15,
            Self::InfoService => 16,
            Self::InfoControl => 17,
            Self::Info => 20,
            Self::Warn => 30,
            Self::Error => 40,
        }
    }

    /// Canonical upper-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::InfoConfig => "INFO_CONFIG",
            Self::InfoUtils => "INFO_UTILS",
            Self::InfoDatabase => "INFO_DATABASE",
            Self::InfoKernel => "INFO_KERNEL",
            Self::InfoCore => "INFO_CORE",
            Self::InfoService => "INFO_SERVICE",
            Self::InfoControl => "INFO_CONTROL",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    /// Look a level up by its severity value.
    pub fn from_severity(severity: u8) -> Option<Self> {
        Self::all().into_iter().find(|l| l.severity() == severity)
    }

    /// Whether this is one of the category levels.
    pub fn is_custom(self) -> bool {
        CUSTOM_LEVELS.contains(&self)
    }

    /// All category levels in severity order.
    pub fn custom_levels() -> &'static [LogLevel] {
        &CUSTOM_LEVELS
    }

    /// Every level in severity order.
    pub fn all() -> [LogLevel; 12] {
        [
            Self::Trace,
            Self::Debug,
            Self::InfoConfig,
            Self::InfoUtils,
            Self::InfoDatabase,
            Self::InfoKernel,
            Self::InfoCore,
            Self::InfoService,
            Self::InfoControl,
            Self::Info,
            Self::Warn,
            Self::Error,
        ]
    }

    /// The `tracing` level events at this level are emitted with.
    pub fn tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
            _ => tracing::Level::DEBUG,
        }
    }

    /// Map a plain `tracing` level back to a [`LogLevel`].
    pub fn from_tracing(level: &tracing::Level) -> Self {
        if *level == tracing::Level::TRACE {
            Self::Trace
        } else if *level == tracing::Level::DEBUG {
            Self::Debug
        } else if *level == tracing::Level::INFO {
            Self::Info
        } else if *level == tracing::Level::WARN {
            Self::Warn
        } else {
            Self::Error
        }
    }

    /// The level an event or span was emitted at.
    ///
    /// Category levels are recognised by their target; everything else falls
    /// back to the `tracing` level.
    pub fn of_metadata(metadata: &Metadata<'_>) -> Self {
        metadata
            .target()
            .strip_prefix(CATEGORY_TARGET_PREFIX)
            .and_then(Self::parse)
            .unwrap_or_else(|| Self::from_tracing(metadata.level()))
    }

    /// Whether a threshold of `self` lets `metadata` through.
    pub fn admits(self, metadata: &Metadata<'_>) -> bool {
        Self::of_metadata(metadata).severity() >= self.severity()
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        LevelFilter::from_level(level.tracing_level())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParseLevelError(s.to_string()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = ParseLevelError;

    fn try_from(value: String) -> Result<Self, ParseLevelError> {
        value.parse()
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Layer that drops events and spans below a [`LogLevel`] threshold.
///
/// Unlike a [`LevelFilter`], category levels are compared by severity, so a
/// threshold of `INFO_UTILS` drops plain DEBUG and `INFO_CONFIG` output but
/// keeps `INFO_CORE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelThreshold {
    level: LogLevel,
}

impl LevelThreshold {
    /// Admit events at `level` or above.
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }
}

impl<S: Subscriber> Layer<S> for LevelThreshold {
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        self.level.admits(metadata)
    }
}

/// Emit a tracing event at a runtime-selected [`LogLevel`].
///
/// Category levels become DEBUG events with a `category` field, targeted at
/// [`CATEGORY_TARGET_PREFIX`] plus the level name.
#[macro_export]
macro_rules! emit {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::LogLevel::Trace => $crate::__tracing::trace!($($arg)+),
            $crate::LogLevel::Debug => $crate::__tracing::debug!($($arg)+),
            $crate::LogLevel::InfoConfig => $crate::__tracing::debug!(
                target: "tk_base::category::INFO_CONFIG",
                category = "INFO_CONFIG",
                $($arg)+
            ),
            $crate::LogLevel::InfoUtils => $crate::__tracing::debug!(
                target: "tk_base::category::INFO_UTILS",
                category = "INFO_UTILS",
                $($arg)+
            ),
            $crate::LogLevel::InfoDatabase => $crate::__tracing::debug!(
                target: "tk_base::category::INFO_DATABASE",
                category = "INFO_DATABASE",
                $($arg)+
            ),
            $crate::LogLevel::InfoKernel => $crate::__tracing::debug!(
                target: "tk_base::category::INFO_KERNEL",
                category = "INFO_KERNEL",
                $($arg)+
            ),
            $crate::LogLevel::InfoCore => $crate::__tracing::debug!(
                target: "tk_base::category::INFO_CORE",
                category = "INFO_CORE",
                $($arg)+
            ),
            $crate::LogLevel::InfoService => $crate::__tracing::debug!(
                target: "tk_base::category::INFO_SERVICE",
                category = "INFO_SERVICE",
                $($arg)+
            ),
            $crate::LogLevel::InfoControl => $crate::__tracing::debug!(
                target: "tk_base::category::INFO_CONTROL",
                category = "INFO_CONTROL",
                $($arg)+
            ),
            $crate::LogLevel::Info => $crate::__tracing::info!($($arg)+),
            $crate::LogLevel::Warn => $crate::__tracing::warn!($($arg)+),
            $crate::LogLevel::Error => $crate::__tracing::error!($($arg)+),
        }
    };
}
