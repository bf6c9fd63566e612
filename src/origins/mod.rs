//! Origins subsystem.
//!
//! # Data Flow
//! ```text
//! ApplicationConfig.origins
//!     → inventory.rs (diff by id, track Active/Inactive/Disabled)
//!     → RemoteHostFactory builds pool.rs ConnectionPool + client per origin
//!     → ActiveOrigins::snapshot() hands the active set to load balancing
//!
//! Health checks / operator commands
//!     → inventory.rs state change
//!     → OriginsChangeListener notified, then new snapshot published
//!
//! Backend responses
//!     → stats.rs (per-origin 5xx rate)
//! ```
//!
//! # Design Decisions
//! - Load balancers only read pool counters; the pool owns them
//! - One inventory per application, never shared

pub mod inventory;
pub mod origin;
pub mod pool;
pub mod remote_host;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use inventory::{
    ActiveOrigins, InventoryError, OriginState, OriginsChangeListener, OriginsInventory,
    OriginsSnapshot, RemoteHostFactory,
};
pub use origin::{AppId, Origin, OriginId};
pub use pool::{ConnectionPool, Connector, OriginPool, PoolSettings, PoolStats, PooledConnection};
pub use remote_host::{LoadBalancingMetric, RemoteHost};
pub use stats::OriginStats;
