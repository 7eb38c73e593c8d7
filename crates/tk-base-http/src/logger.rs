//! Request, response, retry and error logging for the HTTP clients.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tk_base_log::{emit, LogLevel};

use crate::config::ClientConfig;
use crate::error::HttpError;
use crate::request::PreparedRequest;
use crate::response::Response;

/// Header names whose values never reach the logs.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "x-access-token",
    "bearer",
    "api-key",
    "auth-token",
];

/// Replacement for sensitive header values.
pub const REDACTED: &str = "***REDACTED***";

/// Longest request body, in characters, written to the logs.
pub const MAX_LOGGED_BODY: usize = 500;

/// Copy `headers` into a printable map with sensitive values replaced.
pub fn redact_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// Cut `body` to at most `max_chars` characters.
pub fn truncate_body(body: &str, max_chars: usize) -> Cow<'_, str> {
    match body.char_indices().nth(max_chars) {
        Some((end, _)) => Cow::Owned(body[..end].to_string()),
        None => Cow::Borrowed(body),
    }
}

/// Logs client traffic at or above the configured threshold.
#[derive(Debug, Clone)]
pub struct HttpLogger {
    level: LogLevel,
    log_requests: bool,
    log_responses: bool,
    max_retries: u32,
}

impl HttpLogger {
    /// Logger with the threshold and toggles from `config`.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            level: config.log_level,
            log_requests: config.log_requests,
            log_responses: config.log_responses,
            max_retries: config.max_retries,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Whether a record at `level` passes this logger's threshold.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }

    /// Log an outgoing attempt at INFO; headers and body follow at DEBUG.
    pub fn log_request(&self, request: &PreparedRequest, attempt: u32) {
        if !self.log_requests {
            return;
        }
        if self.enabled(LogLevel::Info) {
            emit!(
                LogLevel::Info,
                method = %request.method,
                url = %request.url,
                attempt,
                "Request: {} {}",
                request.method,
                request.url
            );
        }
        if self.enabled(LogLevel::Debug) {
            let body = request.body.as_ref().map(|b| b.preview()).unwrap_or_default();
            emit!(
                LogLevel::Debug,
                headers = ?redact_headers(&request.headers),
                query = ?request.query,
                body = %truncate_body(&body, MAX_LOGGED_BODY),
                "Request details"
            );
        }
    }

    /// Log a response: INFO below 400, WARN otherwise.
    pub fn log_response(&self, response: &Response) {
        if !self.log_responses {
            return;
        }
        let status = response.status_code();
        let elapsed = response.elapsed().as_secs_f64();
        let level = if status < 400 { LogLevel::Info } else { LogLevel::Warn };
        if self.enabled(level) {
            emit!(
                level,
                status,
                url = %response.url(),
                elapsed_s = elapsed,
                "Response: {} {} ({:.3}s)",
                status,
                response.url(),
                elapsed
            );
        }
        if self.enabled(LogLevel::Debug) {
            emit!(
                LogLevel::Debug,
                headers = ?redact_headers(response.headers()),
                content_length = response.content().len(),
                "Response details"
            );
        }
    }

    /// `attempt` is the failed attempt; the retry about to happen is `attempt`
    /// of `max_retries`.
    pub fn log_retry(&self, attempt: u32, delay: Duration, error: &HttpError, url: &str) {
        if self.enabled(LogLevel::Warn) {
            emit!(
                LogLevel::Warn,
                attempt,
                max_retries = self.max_retries,
                delay_s = delay.as_secs_f64(),
                error = %error,
                "Retry {}/{} for {} after {:.1}s delay",
                attempt,
                self.max_retries,
                url,
                delay.as_secs_f64()
            );
        }
    }

    /// Log a terminal failure at ERROR.
    pub fn log_error(&self, error: &HttpError, method: &str, url: &str) {
        if !self.enabled(LogLevel::Error) {
            return;
        }
        match error.last_failure() {
            HttpError::Timeout(_) => {
                emit!(LogLevel::Error, method, url, error = %error, "Timeout for {method} {url}")
            }
            HttpError::Connection(_) => emit!(
                LogLevel::Error,
                method,
                url,
                error = %error,
                "Connection error for {method} {url}"
            ),
            _ => emit!(LogLevel::Error, method, url, error = %error, "Error in {} {}", method, url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, COOKIE};

    #[test]
    fn test_redact_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        headers.insert(COOKIE, HeaderValue::from_static("session=abc"));
        headers.insert("X-Api-Key", HeaderValue::from_static("k"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let redacted = redact_headers(&headers);
        assert_eq!(redacted["authorization"], REDACTED);
        assert_eq!(redacted["cookie"], REDACTED);
        assert_eq!(redacted["x-api-key"], REDACTED);
        assert_eq!(redacted["content-type"], "application/json");
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short", 500), "short");
        let long = "x".repeat(600);
        assert_eq!(truncate_body(&long, MAX_LOGGED_BODY).len(), 500);
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(10);
        let cut = truncate_body(&body, 3);
        assert_eq!(cut, "ééé");
        assert_eq!(cut.len(), 6);
    }

    #[test]
    fn test_threshold() {
        let logger = HttpLogger::new(&ClientConfig::default());
        assert_eq!(logger.level(), LogLevel::InfoUtils);
        assert!(logger.enabled(LogLevel::Info));
        assert!(logger.enabled(LogLevel::InfoUtils));
        assert!(!logger.enabled(LogLevel::InfoConfig));
        assert!(!logger.enabled(LogLevel::Debug));

        let quiet = HttpLogger::new(&ClientConfig {
            log_level: LogLevel::Error,
            ..Default::default()
        });
        assert!(!quiet.enabled(LogLevel::Warn));
        assert!(quiet.enabled(LogLevel::Error));
    }
}
