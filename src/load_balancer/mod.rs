//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! BackendServiceClient
//!     → ActiveOrigins::snapshot()
//!     → LoadBalancer::rank(snapshot, context):
//!         - round_robin.rs (rotate, skip origins that cannot lend now)
//!         - busy_connections.rs (error tier, leased, availability)
//!         - power_of_two.rs (two random draws, lower load wins)
//!         - adaptive.rs (round robin until warmed up, then busy connections)
//!     → ordered vote; the client tries candidates in order
//! ```
//!
//! # Design Decisions
//! - Strategies read pool counters and never touch pool state
//! - The only mutable state is strategy-local and atomic
//! - An empty snapshot is an empty vote, never an error

pub mod adaptive;
pub mod busy_connections;
pub mod context;
pub mod factory;
pub mod power_of_two;
pub mod round_robin;

use std::fmt::Debug;

use thiserror::Error;

use crate::origins::RemoteHost;

pub use adaptive::Adaptive;
pub use busy_connections::BusyConnections;
pub use context::{LoadBalancingContext, RequestContext};
pub use factory::build_load_balancer;
pub use power_of_two::{PowerOfTwo, RandomSource, SeededRandom};
pub use round_robin::RoundRobin;

/// Trait for load balancing algorithms.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Order the given origins by preference, most preferred first.
    fn rank(&self, origins: &[RemoteHost], context: &dyn LoadBalancingContext) -> Vec<RemoteHost>;

    /// The single preferred origin.
    fn choose(
        &self,
        origins: &[RemoteHost],
        context: &dyn LoadBalancingContext,
    ) -> Option<RemoteHost> {
        self.rank(origins, context).into_iter().next()
    }

    fn name(&self) -> &'static str;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("warmup_requests must be at least 1, got {0}")]
    InvalidWarmup(usize),
}
