//! HTTP response types.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::HttpError;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    content: Bytes,
    text: String,
    json: Option<serde_json::Value>,
    elapsed: Duration,
    url: String,
    encoding: Option<String>,
}

impl Response {
    /// Build a response from its parts, decoding the body eagerly.
    pub fn from_parts(
        status: StatusCode,
        headers: HeaderMap,
        content: Bytes,
        elapsed: Duration,
        url: impl Into<String>,
    ) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let encoding = charset(&content_type);
        let text = String::from_utf8_lossy(&content).into_owned();
        let json = if content_type.starts_with("application/json") {
            serde_json::from_slice(&content).ok()
        } else {
            None
        };

        Self {
            status,
            headers,
            content,
            text,
            json,
            elapsed,
            url: url.into(),
            encoding,
        }
    }

    pub(crate) async fn read(
        response: reqwest::Response,
        started: Instant,
    ) -> Result<Self, HttpError> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let content = response.bytes().await?;
        Ok(Self::from_parts(status, headers, content, started.elapsed(), url))
    }

    pub(crate) fn read_blocking(
        response: reqwest::blocking::Response,
        started: Instant,
    ) -> Result<Self, HttpError> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let content = response.bytes()?;
        Ok(Self::from_parts(status, headers, content, started.elapsed(), url))
    }

    /// Status code of the final attempt.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed body, present when the content type is JSON and it parsed.
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json.as_ref()
    }

    /// Deserialize the body regardless of its content type.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, ResponseError> {
        serde_json::from_slice(&self.content).map_err(|e| ResponseError::Parse {
            status: self.status.as_u16(),
            body: self.text.clone(),
            source: e,
        })
    }

    /// Time from sending the request to reading the whole body.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Final URL, after redirects.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Charset named by the content type, if any.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Turn 4xx and 5xx responses into [`HttpError::Status`].
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.is_client_error() || self.is_server_error() {
            Err(HttpError::Status {
                status: self.status.as_u16(),
                url: self.url,
                body: self.text,
            })
        } else {
            Ok(self)
        }
    }
}

fn charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim() == "charset")
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

/// Response parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("failed to parse JSON (status {status}): {source}")]
    Parse {
        status: u16,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}
