//! HTTP client utilities for tk-base.
//!
//! Async and blocking clients over reqwest with YAML config, exponential
//! backoff retries for transient failures and redacted request logging.

pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod request;
pub mod response;
pub mod retry;

pub use client::{build_blocking_client, build_client, BlockingHttpClient, HttpClient};
pub use config::{ClientConfig, ConfigError};
pub use error::{Classify, FailureKind, HttpError};
pub use logger::{redact_headers, truncate_body, HttpLogger};
pub use request::{headers, parse_method, validate_url, Body, PreparedRequest, RequestOptions};
pub use response::{Response, ResponseError};
pub use retry::{
    next_retry, retry_async, retry_async_with_cancel, retry_blocking, retry_blocking_with_cancel,
    CancelToken, RetryDecision, RetryError, RetryPolicy, RetryStep,
};
