//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (deadline on the response)
//!     → routing → BackendServiceClient (falls over to the next origin itself)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend exchange has a deadline
//! - Connect timeouts live in the connector, response timeouts here

pub mod timeouts;

pub use timeouts::TimeoutHandler;
