//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each origin of each application
//!     → Update state.rs
//!     → On transition: OriginsInventory::origin_healthy / origin_unhealthy
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Disabled origins are left alone until an operator enables them
//! - Health state is per-origin, not per-pool

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthTracker, Transition};
