//! Error taxonomy for the request-dispatch path.
//!
//! # Responsibilities
//! - Name every failure the proxy can turn into an HTTP status
//! - Keep the cause chain intact so the status mapper can look through wrappers
//!
//! # Design Decisions
//! - One flat enum; nesting happens through `source()`, never through variants
//!   that embed other variants
//! - Origin ids travel with the error so synthesized responses can name the origin

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::origins::{AppId, OriginId};

/// Boxed error used for causes coming from hyper and other libraries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for the dispatch path.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// What was wrong with a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequestKind {
    /// Request line or headers exceeded the configured limits.
    HeadersTooLarge,
    /// Anything else the decoder rejected.
    Malformed,
}

impl fmt::Display for BadRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadRequestKind::HeadersTooLarge => f.write_str("request line or headers too large"),
            BadRequestKind::Malformed => f.write_str("malformed request"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("origin {origin} is unreachable")]
    OriginUnreachable {
        origin: OriginId,
        #[source]
        source: BoxError,
    },

    #[error("no hosts available for application {app}")]
    NoAvailableHosts { app: AppId },

    #[error("no service configured for {path}")]
    NoServiceConfigured { path: String },

    #[error("bad response from origin {origin}")]
    BadHttpResponse {
        origin: OriginId,
        #[source]
        source: BoxError,
    },

    #[error("response from origin {origin} exceeded {limit} bytes")]
    ContentOverflow { origin: OriginId, limit: usize },

    #[error("connection pool for origin {origin} exhausted: {reason}")]
    ResourceExhausted {
        origin: OriginId,
        reason: &'static str,
    },

    #[error("no response within {timeout:?}")]
    ResponseTimeout {
        origin: Option<OriginId>,
        timeout: Duration,
    },

    #[error("client request was not received in time")]
    RequestTimeout,

    #[error("bad request: {kind}")]
    BadRequest {
        kind: BadRequestKind,
        #[source]
        source: Option<BoxError>,
    },

    #[error("transport to origin {origin} lost")]
    TransportLost {
        origin: OriginId,
        #[source]
        source: BoxError,
    },

    #[error("client disconnected before the response was delivered")]
    ConsumerDisconnected,

    /// A generic wrapper around a failure raised inside the handler chain.
    #[error("handler failed: {context}")]
    Handler {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Wrap an arbitrary cause raised inside the handler chain.
    pub fn handler(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ProxyError::Handler {
            context: context.into(),
            source: source.into(),
        }
    }

    /// The origin this error itself names, if any.
    pub fn origin(&self) -> Option<&OriginId> {
        match self {
            ProxyError::OriginUnreachable { origin, .. }
            | ProxyError::BadHttpResponse { origin, .. }
            | ProxyError::ContentOverflow { origin, .. }
            | ProxyError::ResourceExhausted { origin, .. }
            | ProxyError::TransportLost { origin, .. } => Some(origin),
            ProxyError::ResponseTimeout { origin, .. } => origin.as_ref(),
            _ => None,
        }
    }

    /// The first origin named anywhere along the cause chain.
    pub fn origin_in_chain(&self) -> Option<OriginId> {
        causes(self)
            .filter_map(|e| e.downcast_ref::<ProxyError>())
            .find_map(|e| e.origin().cloned())
    }

    /// A plain I/O failure on the client transport; nothing useful can be written back.
    pub fn is_bare_io(&self) -> bool {
        matches!(self, ProxyError::Io(_))
    }

    /// True when the client went away somewhere along the chain.
    pub fn is_consumer_disconnected(&self) -> bool {
        causes(self)
            .filter_map(|e| e.downcast_ref::<ProxyError>())
            .any(|e| matches!(e, ProxyError::ConsumerDisconnected))
    }
}

/// Iterate an error and its `source()` chain, outermost first.
pub fn causes<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> impl Iterator<Item = &'a (dyn std::error::Error + 'static)> {
    std::iter::successors(Some(error), |e| e.source())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_found_through_wrapper() {
        let inner = ProxyError::ResourceExhausted {
            origin: OriginId::from("o1"),
            reason: "max pending borrowers reached",
        };
        let outer = ProxyError::handler("plugin", inner);

        assert_eq!(outer.origin(), None);
        assert_eq!(outer.origin_in_chain(), Some(OriginId::from("o1")));
    }

    #[test]
    fn consumer_disconnect_detected_when_nested() {
        let err = ProxyError::handler("plugin", ProxyError::ConsumerDisconnected);
        assert!(err.is_consumer_disconnected());
        assert!(!ProxyError::RequestTimeout.is_consumer_disconnected());
    }

    #[test]
    fn bare_io_only_for_io_variant() {
        let io = ProxyError::from(io::Error::new(io::ErrorKind::BrokenPipe, "reset"));
        assert!(io.is_bare_io());
        assert!(!ProxyError::Internal("boom".into()).is_bare_io());
    }
}
