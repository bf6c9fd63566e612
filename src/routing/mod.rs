//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (route lookup, host-specific first, longest prefix)
//!     → matcher.rs (evaluate match conditions)
//!     → application handler, or NoServiceConfigured
//!
//! Route Compilation (at startup):
//!     ApplicationConfig[]
//!     → one Route per application (host + path prefix)
//!     → sorted and frozen as an immutable ApplicationRouter
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{ApplicationRouter, Route, RoutingHandler};
