//! Adaptive load balancing strategy.
//!
//! Starts out as round robin so that fresh origins see an even spread of
//! traffic, then switches to busy connections once every active origin has
//! taken part in `warmup_requests` votes. An inventory change restarts the
//! warm-up.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::load_balancer::{
    BusyConnections, LoadBalancer, LoadBalancingContext, RoundRobin, StrategyError,
};
use crate::origins::{OriginId, OriginsChangeListener, OriginsSnapshot, RemoteHost};

#[derive(Debug)]
pub struct Adaptive {
    warmup_requests: usize,
    round_robin: RoundRobin,
    busy_connections: BusyConnections,
    counters: DashMap<OriginId, usize>,
    switched: AtomicBool,
}

impl Adaptive {
    pub fn new(warmup_requests: usize) -> Result<Self, StrategyError> {
        if warmup_requests < 1 {
            return Err(StrategyError::InvalidWarmup(warmup_requests));
        }
        Ok(Self {
            warmup_requests,
            round_robin: RoundRobin::new(),
            busy_connections: BusyConnections::new(),
            counters: DashMap::new(),
            switched: AtomicBool::new(false),
        })
    }

    /// Name of the strategy the next vote will be delegated to.
    pub fn current_strategy(&self) -> &'static str {
        if self.switched.load(Ordering::Acquire) {
            self.busy_connections.name()
        } else {
            self.round_robin.name()
        }
    }

    fn warmed_up(&self, origins: &[RemoteHost]) -> bool {
        !origins.is_empty()
            && origins.iter().all(|host| {
                self.counters
                    .get(host.id())
                    .is_some_and(|count| *count >= self.warmup_requests)
            })
    }
}

impl LoadBalancer for Adaptive {
    fn rank(&self, origins: &[RemoteHost], context: &dyn LoadBalancingContext) -> Vec<RemoteHost> {
        if self.switched.load(Ordering::Acquire) {
            return self.busy_connections.rank(origins, context);
        }

        if self.warmed_up(origins) {
            if !self.switched.swap(true, Ordering::AcqRel) {
                tracing::info!(
                    app = %context.app_id(),
                    warmup_requests = self.warmup_requests,
                    "Adaptive load balancer switched to busy connections"
                );
            }
            return self.busy_connections.rank(origins, context);
        }

        for host in origins {
            let mut count = self.counters.entry(host.id().clone()).or_insert(0);
            *count = count.saturating_add(1);
        }
        self.round_robin.rank(origins, context)
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}

impl OriginsChangeListener for Adaptive {
    fn origins_changed(&self, snapshot: &OriginsSnapshot) {
        self.counters.clear();
        if self.switched.swap(false, Ordering::AcqRel) {
            tracing::info!(
                app = %snapshot.app_id,
                active = snapshot.active.len(),
                "Origins changed, adaptive load balancer back to round robin"
            );
        }
    }
}
