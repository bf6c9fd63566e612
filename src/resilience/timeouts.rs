//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on the whole exchange with the backend
//! - Drop the inner future on expiry so the origin exchange is abandoned
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The deadline covers response headers only; body streaming is not bounded
//! - Timed-out requests surface as `ResponseTimeout` and map to 504

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

use crate::error::{ProxyError, ProxyResult};
use crate::http::handler::HttpHandler;

/// Wraps a handler and fails requests whose response headers take too long.
#[derive(Debug, Clone)]
pub struct TimeoutHandler<H> {
    inner: H,
    timeout: Duration,
}

impl<H: HttpHandler> TimeoutHandler<H> {
    pub fn new(inner: H, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<H: HttpHandler> HttpHandler for TimeoutHandler<H> {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>> {
        let timeout = self.timeout;
        let path = request.uri().path().to_string();
        let response = self.inner.handle(request);
        Box::pin(async move {
            match tokio::time::timeout(timeout, response).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(path = %path, timeout_ms = timeout.as_millis() as u64, "Response timed out");
                    Err(ProxyError::ResponseTimeout {
                        origin: None,
                        timeout,
                    })
                }
            }
        })
    }
}
