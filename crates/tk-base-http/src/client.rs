//! Async and blocking HTTP clients with retries and request logging.

use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use tk_base_log::spans::request_span;
use tracing::Instrument;

use crate::config::ClientConfig;
use crate::error::HttpError;
use crate::logger::HttpLogger;
use crate::request::{PreparedRequest, RequestOptions};
use crate::response::Response;
use crate::retry::{
    retry_async_with_cancel, retry_blocking_with_cancel, CancelToken, RetryError, RetryPolicy,
};

fn redirect_policy(config: &ClientConfig) -> Policy {
    if config.follow_redirects {
        Policy::default()
    } else {
        Policy::none()
    }
}

/// Build a configured async reqwest client.
///
/// No default headers are installed here; they are merged per request so a
/// request can opt out of them.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .redirect(redirect_policy(config))
        .danger_accept_invalid_certs(!config.verify_ssl)
        .gzip(true)
        .build()
        .map_err(HttpError::ClientBuild)
}

/// Build a configured blocking reqwest client.
pub fn build_blocking_client(
    config: &ClientConfig,
) -> Result<reqwest::blocking::Client, HttpError> {
    reqwest::blocking::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .redirect(redirect_policy(config))
        .danger_accept_invalid_certs(!config.verify_ssl)
        .gzip(true)
        .build()
        .map_err(HttpError::ClientBuild)
}

fn into_http_error(policy: &RetryPolicy, error: RetryError<HttpError>) -> HttpError {
    match error {
        RetryError::Failed(error) => error,
        RetryError::Exhausted { attempts, last } => HttpError::RetriesExhausted {
            retries: policy.max_retries,
            attempts,
            source: Box::new(last),
        },
        RetryError::Cancelled => HttpError::Cancelled,
    }
}

/// Config state shared by both clients.
#[derive(Debug, Clone)]
struct Settings {
    config: ClientConfig,
    default_headers: HeaderMap,
    policy: RetryPolicy,
    logger: HttpLogger,
}

impl Settings {
    fn new(config: ClientConfig) -> Result<Self, HttpError> {
        config.validate()?;
        Ok(Self {
            default_headers: config.default_headers()?,
            policy: config.retry_policy(),
            logger: HttpLogger::new(&config),
            config,
        })
    }

    fn prepare(
        &self,
        method: &str,
        url: &str,
        options: RequestOptions,
    ) -> Result<PreparedRequest, HttpError> {
        PreparedRequest::prepare(method, url, options, &self.default_headers).map_err(|e| {
            self.logger.log_error(&e, method, url);
            e
        })
    }

    fn check(&self, response: Response) -> Result<Response, HttpError> {
        self.logger.log_response(&response);
        if self.config.error_for_status {
            response.error_for_status()
        } else {
            Ok(response)
        }
    }

    fn finish(
        &self,
        request: &PreparedRequest,
        result: Result<Response, RetryError<HttpError>>,
    ) -> Result<Response, HttpError> {
        result.map_err(|e| {
            let error = into_http_error(&self.policy, e);
            self.logger.log_error(&error, request.method.as_str(), &request.url);
            error
        })
    }
}

/// Async HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    settings: Settings,
}

impl HttpClient {
    /// Create a client with default config.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with custom config.
    pub fn with_config(config: ClientConfig) -> Result<Self, HttpError> {
        let inner = build_client(&config)?;
        let settings = Settings::new(config)?;
        Ok(Self { inner, settings })
    }

    /// Create a client from a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, HttpError> {
        Self::with_config(ClientConfig::from_yaml_file(path)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.settings.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.settings.policy
    }

    /// Get the inner reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Send a request, retrying transient failures.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, HttpError> {
        self.request_with_cancel(method, url, options, &CancelToken::new())
            .await
    }

    /// [`request`](Self::request) that stops as soon as `cancel` fires,
    /// whether mid-attempt or between attempts.
    pub async fn request_with_cancel(
        &self,
        method: &str,
        url: &str,
        options: RequestOptions,
        cancel: &CancelToken,
    ) -> Result<Response, HttpError> {
        let settings = &self.settings;
        let request = settings.prepare(method, url, options)?;
        let span = request_span(request.method.as_str(), &request.url);

        let result = {
            let request = &request;
            let span = &span;
            retry_async_with_cancel(
                &settings.policy,
                cancel,
                move |attempt| {
                    span.record("attempts", attempt);
                    self.attempt(request, attempt)
                },
                |attempt, delay: Duration, error: &HttpError| {
                    settings.logger.log_retry(attempt, delay, error, &request.url)
                },
            )
            .instrument(span.clone())
            .await
        };

        settings.finish(&request, result)
    }

    async fn attempt(
        &self,
        request: &PreparedRequest,
        attempt: u32,
    ) -> Result<Response, HttpError> {
        self.settings.logger.log_request(request, attempt);
        let started = Instant::now();
        let builder = request.apply(self.inner.request(request.method.clone(), &request.url));
        let response = builder.send().await?;
        let response = Response::read(response, started).await?;
        self.settings.check(response)
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("GET", url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("POST", url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("PUT", url, options).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("DELETE", url, options).await
    }

    pub async fn patch(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("PATCH", url, options).await
    }

    pub async fn head(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("HEAD", url, options).await
    }

    pub async fn options(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("OPTIONS", url, options).await
    }
}

/// Blocking HTTP client. Waits between retries block the calling thread.
///
/// Must not be created or dropped inside an async runtime; use
/// `tokio::task::spawn_blocking` from async code.
#[derive(Debug, Clone)]
pub struct BlockingHttpClient {
    inner: reqwest::blocking::Client,
    settings: Settings,
}

impl BlockingHttpClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, HttpError> {
        let inner = build_blocking_client(&config)?;
        let settings = Settings::new(config)?;
        Ok(Self { inner, settings })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, HttpError> {
        Self::with_config(ClientConfig::from_yaml_file(path)?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.settings.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.settings.policy
    }

    pub fn inner(&self) -> &reqwest::blocking::Client {
        &self.inner
    }

    /// Send a request, retrying transient failures.
    pub fn request(
        &self,
        method: &str,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, HttpError> {
        self.request_with_cancel(method, url, options, &CancelToken::new())
    }

    /// [`request`](Self::request) that stops when `cancel` fires.
    ///
    /// A pending retry wait ends immediately; an attempt already on the wire
    /// runs to completion, after which no further attempt is made.
    pub fn request_with_cancel(
        &self,
        method: &str,
        url: &str,
        options: RequestOptions,
        cancel: &CancelToken,
    ) -> Result<Response, HttpError> {
        let settings = &self.settings;
        let request = settings.prepare(method, url, options)?;
        let span = request_span(request.method.as_str(), &request.url);
        let _entered = span.enter();

        let result = retry_blocking_with_cancel(
            &settings.policy,
            cancel,
            |attempt| {
                span.record("attempts", attempt);
                self.attempt(&request, attempt)
            },
            |attempt, delay: Duration, error: &HttpError| {
                settings.logger.log_retry(attempt, delay, error, &request.url)
            },
        );

        settings.finish(&request, result)
    }

    fn attempt(&self, request: &PreparedRequest, attempt: u32) -> Result<Response, HttpError> {
        self.settings.logger.log_request(request, attempt);
        let started = Instant::now();
        let builder = self.inner.request(request.method.clone(), &request.url);
        let builder = request.apply_blocking(builder);
        let response = builder.send()?;
        let response = Response::read_blocking(response, started)?;
        self.settings.check(response)
    }

    pub fn get(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("GET", url, options)
    }

    pub fn post(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("POST", url, options)
    }

    pub fn put(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("PUT", url, options)
    }

    pub fn delete(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("DELETE", url, options)
    }

    pub fn patch(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("PATCH", url, options)
    }

    pub fn head(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("HEAD", url, options)
    }

    pub fn options(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.request("OPTIONS", url, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpClient::new().unwrap();
        assert_eq!(client.config().max_retries, 3);
        assert_eq!(client.retry_policy().max_attempts(), 4);
    }

    #[test]
    fn test_client_rejects_invalid_config() {
        let config = ClientConfig {
            retry_backoff_factor: 0.0,
            ..Default::default()
        };
        assert!(matches!(HttpClient::with_config(config), Err(HttpError::Config(_))));
    }

    #[test]
    fn test_build_client_variants() {
        let config = ClientConfig {
            follow_redirects: false,
            verify_ssl: false,
            ..Default::default()
        };
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn test_exhausted_mapping() {
        let policy = RetryPolicy::default();
        let error = into_http_error(
            &policy,
            RetryError::Exhausted {
                attempts: 4,
                last: HttpError::Connection("refused".into()),
            },
        );
        match error {
            HttpError::RetriesExhausted { retries, attempts, source } => {
                assert_eq!(retries, 3);
                assert_eq!(attempts, 4);
                assert!(source.is_connection());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(into_http_error(&policy, RetryError::Cancelled), HttpError::Cancelled));
    }

    #[tokio::test]
    async fn test_validation_fails_before_sending() {
        let client = HttpClient::new().unwrap();
        let err = client
            .request("FETCH", "https://api.example.com", RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Validation(_)));

        let err = client.get("localhost/items", RequestOptions::new()).await.unwrap_err();
        assert!(matches!(err, HttpError::Validation(_)));
    }
}
