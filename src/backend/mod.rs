//! Origin-facing HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! RoutingHandler
//!     → client.rs BackendServiceClient::send
//!         → load balancer vote over the active origins
//!         → HostClient::lease (pool borrow + connection ready)
//!         → OriginExchange::send (request written, response head read)
//!     → response body streams back; connection returns to the pool at end of body
//!
//! application.rs wires one inventory, strategy, stats and client per
//! configured application.
//! ```

pub mod application;
pub mod client;
pub mod connector;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

use crate::error::ProxyResult;

pub use application::{Application, ApplicationError};
pub use client::BackendServiceClient;
pub use connector::{HttpConnection, HttpConnector, HttpHostFactory, PooledHttpClient};

/// Sends requests to one origin.
pub trait HostClient: Send + Sync {
    /// Obtain a connection that is ready to carry a request.
    ///
    /// Failures here happen before anything was written, so another origin
    /// may be tried.
    fn lease(&self) -> BoxFuture<'static, ProxyResult<Box<dyn OriginExchange>>>;
}

/// One request/response exchange on a leased connection.
pub trait OriginExchange: Send {
    fn send(self: Box<Self>, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>>;
}
