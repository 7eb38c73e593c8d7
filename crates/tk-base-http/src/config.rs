//! HTTP client configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tk_base_log::{find_config_file, LogLevel};

use crate::retry::{RetryPolicy, DEFAULT_MAX_DELAY};

/// Config loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", display_line(*line))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },
}

fn display_line(line: Option<usize>) -> String {
    line.map(|l| l.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigError::ValidationError {
            message: message.into(),
        }
    }
}

/// Durations as floating-point seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Total request timeout.
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Connection timeout.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,

    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "secs")]
    pub retry_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub retry_backoff_factor: f64,
    /// Upper bound on a single retry delay.
    #[serde(with = "secs")]
    pub max_retry_delay: Duration,

    /// Threshold for this client's log output.
    pub log_level: LogLevel,
    /// Log each attempt's method, URL and redacted headers.
    pub log_requests: bool,
    /// Log each response's status and timing.
    pub log_responses: bool,

    /// Headers sent with every request unless a request opts out.
    pub headers: BTreeMap<String, String>,
    pub user_agent: String,

    pub follow_redirects: bool,
    pub verify_ssl: bool,
    /// Treat non-2xx responses as errors (and retry 5xx).
    pub error_for_status: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            retry_backoff_factor: 2.0,
            max_retry_delay: DEFAULT_MAX_DELAY,
            log_level: LogLevel::InfoUtils,
            log_requests: true,
            log_responses: true,
            headers: BTreeMap::new(),
            user_agent: format!("HttpClient/{}", env!("CARGO_PKG_VERSION")),
            follow_redirects: true,
            verify_ssl: true,
            error_for_status: true,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Load the nearest `file_name` found by walking up from `start`.
    ///
    /// Other top-level sections in the file, such as `logging:`, are ignored.
    pub fn discover(
        file_name: impl AsRef<Path>,
        start: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let file_name = file_name.as_ref();
        match find_config_file(file_name, start) {
            Some(path) => Self::from_yaml_file(path),
            None => Err(ConfigError::NotFound {
                path: file_name.to_path_buf(),
            }),
        }
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::invalid("connect_timeout must be greater than zero"));
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            return Err(ConfigError::invalid(format!(
                "retry_backoff_factor must be >= 1 (got {})",
                self.retry_backoff_factor
            )));
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(ConfigError::invalid("max_retry_delay must not be below retry_delay"));
        }
        self.default_headers().map(|_| ())
    }

    /// Retry policy for requests made with this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay, self.retry_backoff_factor)
            .with_max_delay(self.max_retry_delay)
    }

    /// Configured headers plus `User-Agent` unless one was given.
    pub fn default_headers(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                ConfigError::invalid(format!("invalid header name {name:?}: {e}"))
            })?;
            let value = HeaderValue::try_from(value.as_str()).map_err(|e| {
                ConfigError::invalid(format!("invalid value for header {name}: {e}"))
            })?;
            headers.insert(name, value);
        }
        if !headers.contains_key(USER_AGENT) {
            let value = HeaderValue::try_from(self.user_agent.as_str())
                .map_err(|e| ConfigError::invalid(format!("invalid user agent: {e}")))?;
            headers.insert(USER_AGENT, value);
        }
        Ok(headers)
    }
}
