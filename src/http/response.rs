//! Synthesized error responses.
//!
//! # Responsibilities
//! - Turn a dispatch failure into a status and a short plain-text body
//! - Add `Content-Length`, `Connection: close`, origin id and request id
//!
//! # Design Decisions
//! - Server-side failures never leak detail; the body is a fixed message
//! - The connection is always closed after a synthesized error

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

use crate::error::ProxyError;
use crate::http::headers::HeaderNames;
use crate::http::request::RequestId;
use crate::http::status::status_for;
use crate::origins::OriginId;

const SERVER_ERROR_BODY: &str = "Site temporarily unavailable.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub origin: Option<OriginId>,
    pub request_id: Option<RequestId>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            origin: None,
            request_id: None,
        }
    }

    /// Status and origin derived from the failure's cause chain.
    pub fn from_error(error: &ProxyError) -> Self {
        Self {
            status: status_for(error),
            origin: error.origin_in_chain(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn body(&self) -> &'static str {
        if self.status.is_server_error() {
            SERVER_ERROR_BODY
        } else {
            self.status.canonical_reason().unwrap_or("Error")
        }
    }

    pub fn into_response(self, names: &HeaderNames) -> Response<Body> {
        let body = self.body();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        if let Some(origin) = &self.origin {
            if let Ok(value) = HeaderValue::from_str(origin.as_str()) {
                headers.insert(names.origin_id.clone(), value);
            }
        }
        if let Some(request_id) = &self.request_id {
            headers.insert(names.request_id.clone(), request_id.header_value());
        }
        response
    }
}
