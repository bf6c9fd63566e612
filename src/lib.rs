//! dispatch-proxy: an HTTP/1.1 reverse proxy core.
//!
//! Requests are matched to an application, an origin is chosen by the
//! application's load-balancing strategy, and a per-connection pipeline
//! guarantees each request gets exactly one outcome.

pub mod backend;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod origins;
pub mod resilience;
pub mod routing;

pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
