//! Request options, validation and preparation.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;

use crate::error::HttpError;

/// Common HTTP headers.
pub mod headers {
    pub const CONTENT_TYPE_JSON: &str = "application/json";
    pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
}

/// Methods the client accepts.
pub const ALLOWED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
];

/// Parse a method name, case-insensitively, rejecting anything not allowed.
pub fn parse_method(method: &str) -> Result<Method, HttpError> {
    let upper = method.trim().to_ascii_uppercase();
    ALLOWED_METHODS
        .iter()
        .find(|m| m.as_str() == upper)
        .cloned()
        .ok_or_else(|| {
            let allowed: Vec<&str> = ALLOWED_METHODS.iter().map(Method::as_str).collect();
            HttpError::Validation(format!(
                "HTTP method must be one of {} (got {method:?})",
                allowed.join(", ")
            ))
        })
}

/// Require an absolute `http://` or `https://` URL.
pub fn validate_url(url: &str) -> Result<(), HttpError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(HttpError::Validation(format!(
            "URL must start with http:// or https:// (got {url:?})"
        )))
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Text(String),
    Bytes(bytes::Bytes),
}

impl Body {
    /// Textual form used in request logs.
    pub fn preview(&self) -> String {
        match self {
            Body::Json(value) => value.to_string(),
            Body::Form(fields) => fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&"),
            Body::Text(text) => text.clone(),
            Body::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Body>,
    timeout: Option<Duration>,
    default_headers: bool,
    invalid: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self {
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            default_headers: true,
            invalid: None,
        }
    }

    fn reject(mut self, message: String) -> Self {
        self.invalid.get_or_insert(message);
        self
    }

    /// Add a header. Request headers override default headers of the same name.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let (name, value) = (name.as_ref(), value.as_ref());
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                self
            }
            _ => self.reject(format!("invalid header {name:?}")),
        }
    }

    /// Add a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Send a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.body = Some(Body::Json(value));
                self
            }
            Err(e) => self.reject(format!("failed to serialize JSON body: {e}")),
        }
    }

    /// Send a URL-encoded form body.
    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.body = Some(Body::Form(fields));
        self
    }

    /// Send a text body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(Body::Text(body.into()));
        self
    }

    /// Send a raw body.
    pub fn bytes(mut self, body: impl Into<bytes::Bytes>) -> Self {
        self.body = Some(Body::Bytes(body.into()));
        self
    }

    /// Override the client's timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the client's default headers are sent with this request.
    pub fn default_headers(mut self, enabled: bool) -> Self {
        self.default_headers = enabled;
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated request ready to be sent, possibly several times.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Normalized upper-case method.
    pub method: Method,
    pub url: String,
    /// Default headers merged with the request's own.
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<Body>,
    /// Overrides the client-wide timeout for this request only.
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    /// Validate `method`, `url` and `options`, merging `defaults` unless the
    /// request opted out of them.
    pub fn prepare(
        method: &str,
        url: &str,
        options: RequestOptions,
        defaults: &HeaderMap,
    ) -> Result<Self, HttpError> {
        let method = parse_method(method)?;
        validate_url(url)?;
        if let Some(message) = options.invalid {
            return Err(HttpError::Validation(message));
        }

        let mut headers = if options.default_headers {
            defaults.clone()
        } else {
            HeaderMap::new()
        };
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }

        if !headers.contains_key(CONTENT_TYPE) {
            let content_type = match &options.body {
                Some(Body::Json(_)) => Some(headers::CONTENT_TYPE_JSON),
                Some(Body::Form(_)) => Some(headers::CONTENT_TYPE_FORM),
                _ => None,
            };
            if let Some(content_type) = content_type {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }

        Ok(Self {
            method,
            url: url.to_string(),
            headers,
            query: options.query,
            body: options.body,
            timeout: options.timeout,
        })
    }

    /// Apply to an async reqwest builder.
    pub(crate) fn apply(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder = builder.headers(self.headers.clone());
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        match &self.body {
            Some(Body::Json(value)) => builder.body(value.to_string()),
            Some(Body::Form(fields)) => builder.form(fields),
            Some(Body::Text(text)) => builder.body(text.clone()),
            Some(Body::Bytes(bytes)) => builder.body(bytes.clone()),
            None => builder,
        }
    }

    /// Apply to a blocking reqwest builder.
    pub(crate) fn apply_blocking(
        &self,
        mut builder: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        builder = builder.headers(self.headers.clone());
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        match &self.body {
            Some(Body::Json(value)) => builder.body(value.to_string()),
            Some(Body::Form(fields)) => builder.form(fields),
            Some(Body::Text(text)) => builder.body(text.clone()),
            Some(Body::Bytes(bytes)) => builder.body(bytes.to_vec()),
            None => builder,
        }
    }
}
