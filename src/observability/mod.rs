//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → whichever metrics recorder the embedder installs
//! ```
//!
//! # Design Decisions
//! - Request ID is a field on every request-scoped log line
//! - Metric helpers take domain types so call sites stay one line

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
