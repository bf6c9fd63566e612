//! Request metadata.
//!
//! # Responsibilities
//! - Keep or generate the request id (UUID v4)
//! - Capture what the pipeline and load balancers need to know about a request
//! - Decide keep-alive from the protocol version and `Connection` header
//!
//! # Design Decisions
//! - Request id added as early as possible for tracing
//! - `RequestInfo` is a cheap copy; the request itself moves to the handler

use std::fmt;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version};
use uuid::Uuid;

/// Correlation id carried on `x-request-id` (or the configured header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The inbound id when it is a valid UUID, a fresh one otherwise.
    pub fn from_headers(headers: &HeaderMap, name: &HeaderName) -> Self {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Self)
            .unwrap_or_else(Self::generate)
    }

    pub fn header_value(&self) -> HeaderValue {
        // A hyphenated UUID is always a valid header value
        HeaderValue::from_str(&self.0.to_string()).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What the proxy remembers about an accepted request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub id: RequestId,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub keep_alive: bool,
}

impl RequestInfo {
    pub fn from_request<B>(request: &Request<B>, request_id_header: &HeaderName) -> Self {
        Self {
            id: RequestId::from_headers(request.headers(), request_id_header),
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            keep_alive: is_keep_alive(request.version(), request.headers()),
        }
    }
}

/// HTTP/1.1 stays open unless told otherwise; HTTP/1.0 only when asked.
pub fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let connection_has = |token: &str| {
        headers.get_all(header::CONNECTION).iter().any(|value| {
            value
                .to_str()
                .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                .unwrap_or(false)
        })
    };

    match version {
        Version::HTTP_10 | Version::HTTP_09 => connection_has("keep-alive"),
        _ => !connection_has("close"),
    }
}
