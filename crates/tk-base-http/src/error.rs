//! HTTP errors and failure classification.

use std::error::Error as _;

use crate::config::ConfigError;
use crate::response::ResponseError;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Timeouts, dropped connections, 5xx responses.
    Transient,
    /// Client errors and validation failures; retrying reproduces them.
    NonRetriable,
}

impl FailureKind {
    pub fn is_transient(self) -> bool {
        self == FailureKind::Transient
    }
}

/// Errors that can classify themselves for the retry loops.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// HTTP errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("request validation failed: {0}")]
    Validation(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("HTTP {status} error for URL {url}")]
    Status { status: u16, url: String, body: String },

    #[error("maximum retry attempts ({retries}) exceeded after {attempts} attempts: {source}")]
    RetriesExhausted {
        retries: u32,
        attempts: u32,
        #[source]
        source: Box<HttpError>,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Decode(#[from] ResponseError),
}

impl HttpError {
    /// Response status, if the error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            HttpError::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// The failure behind a `RetriesExhausted`, or `self`.
    pub fn last_failure(&self) -> &HttpError {
        match self {
            HttpError::RetriesExhausted { source, .. } => source.last_failure(),
            other => other,
        }
    }

    /// Whether the last failure was a timeout, looking through retry exhaustion.
    pub fn is_timeout(&self) -> bool {
        matches!(self.last_failure(), HttpError::Timeout(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self.last_failure(), HttpError::Connection(_))
    }

    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, HttpError::RetriesExhausted { .. })
    }
}

impl Classify for HttpError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            HttpError::Timeout(_) | HttpError::Connection(_) => FailureKind::Transient,
            HttpError::Status { status, .. } if (500..600).contains(status) => {
                FailureKind::Transient
            }
            HttpError::RetriesExhausted { source, .. } => source.failure_kind(),
            _ => FailureKind::NonRetriable,
        }
    }
}

/// Whether the connection went away under the request, including mid-body.
fn dropped_connection(e: &reqwest::Error) -> bool {
    if e.is_connect() || e.is_request() || e.is_body() {
        return true;
    }
    std::iter::successors(e.source(), |&cause| cause.source())
        .any(|cause| cause.is::<std::io::Error>())
}

/// The error message followed by each of its causes.
fn describe(e: &reqwest::Error) -> String {
    std::iter::successors(e.source(), |&cause| cause.source())
        .fold(e.to_string(), |message, cause| format!("{message}: {cause}"))
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout(describe(&e))
        } else if dropped_connection(&e) {
            HttpError::Connection(describe(&e))
        } else {
            HttpError::Request(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use test_case::test_case;

    fn status(code: u16) -> HttpError {
        HttpError::Status {
            status: code,
            url: "https://api.example.com/items".to_string(),
            body: String::new(),
        }
    }

    #[test_case(HttpError::Timeout("read timed out".into()), FailureKind::Transient)]
    #[test_case(HttpError::Connection("connection refused".into()), FailureKind::Transient)]
    #[test_case(status(500), FailureKind::Transient)]
    #[test_case(status(503), FailureKind::Transient)]
    #[test_case(status(404), FailureKind::NonRetriable)]
    #[test_case(status(429), FailureKind::NonRetriable)]
    #[test_case(HttpError::Validation("bad method".into()), FailureKind::NonRetriable)]
    #[test_case(HttpError::Cancelled, FailureKind::NonRetriable)]
    fn test_classification(error: HttpError, expected: FailureKind) {
        assert_eq!(error.failure_kind(), expected);
    }

    #[test]
    fn test_exhausted_preserves_last_failure() {
        let error = HttpError::RetriesExhausted {
            retries: 3,
            attempts: 4,
            source: Box::new(status(502)),
        };

        assert!(error.is_retries_exhausted());
        assert_eq!(error.failure_kind(), FailureKind::Transient);
        assert_eq!(error.status(), Some(502));
        assert!(matches!(error.last_failure(), HttpError::Status { status: 502, .. }));
        assert!(error.source().is_some());

        let message = error.to_string();
        assert!(message.contains("maximum retry attempts (3)"));
        assert!(message.contains("HTTP 502"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            status(404).to_string(),
            "HTTP 404 error for URL https://api.example.com/items"
        );
        assert!(HttpError::Timeout("deadline".into()).to_string().contains("timed out"));
        assert!(HttpError::Connection("refused".into()).is_connection());
    }
}
