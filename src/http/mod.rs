//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → client_io.rs (request head limits and read timeout, ahead of the codec)
//!     → server.rs (hyper HTTP/1.1 codec, one pipeline per connection)
//!     → request.rs (request id, keep-alive)
//!     → pipeline/ (state machine decides what the client gets)
//!     → handler.rs seam → routing → backend client
//!     → on failure: status.rs (error → status) → response.rs (synthesized reply)
//!     → Send to client
//! ```

pub mod client_io;
pub mod handler;
pub mod headers;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use handler::{HandlerFn, HttpHandler};
pub use headers::HeaderNames;
pub use request::{RequestId, RequestInfo};
pub use response::ErrorResponse;
pub use server::{ProxyServer, ServerError};
pub use status::{status_for, status_for_chain};
