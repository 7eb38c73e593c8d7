//! Span helpers for requests and wrapped calls.

use tracing::{debug_span, info_span, Span};

/// Span covering one logical HTTP request, retries included.
///
/// `attempts` starts empty and is recorded as each attempt begins.
pub fn request_span(method: &str, url: &str) -> Span {
    info_span!("request", method = %method, url = %url, attempts = tracing::field::Empty)
}

/// Span covering a call made through a logging wrapper.
pub fn call_span(function: &str) -> Span {
    debug_span!("call", function = %function)
}
