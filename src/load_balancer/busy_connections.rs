//! Busy-connections load balancing strategy.
//!
//! Origins are ordered by three keys, most significant first:
//! 1. error tier: an origin whose 5xx rate is above the snapshot mean sorts last
//! 2. ascending leased connections (busy + pending)
//! 3. origins with an idle connection before those without
//!
//! Remaining ties keep snapshot order.

use crate::load_balancer::{LoadBalancer, LoadBalancingContext};
use crate::origins::RemoteHost;

#[derive(Debug, Default)]
pub struct BusyConnections;

impl BusyConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for BusyConnections {
    fn rank(&self, origins: &[RemoteHost], context: &dyn LoadBalancingContext) -> Vec<RemoteHost> {
        if origins.is_empty() {
            return Vec::new();
        }

        let rates: Vec<f64> = origins
            .iter()
            .map(|host| context.one_minute_rate_for_status_code_5xx(host.origin()))
            .collect();
        let mean = rates.iter().sum::<f64>() / rates.len() as f64;

        let mut keyed: Vec<_> = origins
            .iter()
            .zip(&rates)
            .map(|(host, &rate)| {
                let pool = host.pool();
                let key = (rate > mean, pool.leased_count(), pool.available_count() == 0);
                (key, host)
            })
            .collect();
        keyed.sort_by_key(|(key, _)| *key);

        keyed.into_iter().map(|(_, host)| host.clone()).collect()
    }

    fn name(&self) -> &'static str {
        "busy_connections"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::context::testing::StaticContext;
    use crate::origins::testing::{hosts_with_counts, ids};

    #[test]
    fn fewest_leased_first() {
        let lb = BusyConnections::new();
        let hosts = hosts_with_counts(&[(4, 1), (3, 1), (6, 1)]);

        assert_eq!(ids(&lb.rank(&hosts, &StaticContext::new())), ["h2", "h1", "h3"]);
    }

    #[test]
    fn idle_connection_breaks_ties() {
        let lb = BusyConnections::new();
        let hosts = hosts_with_counts(&[(2, 0), (2, 1)]);

        assert_eq!(ids(&lb.rank(&hosts, &StaticContext::new())), ["h2", "h1"]);
    }

    #[test]
    fn above_mean_error_rate_goes_last() {
        let lb = BusyConnections::new();
        let hosts = hosts_with_counts(&[(1, 1), (0, 1), (5, 1)]);
        let ctx = StaticContext::new()
            .with_rate("h1", 2.0)
            .with_rate("h2", 3.0)
            .with_rate("h3", 1.0);

        // Mean is 2.0: only h2 is strictly above it
        assert_eq!(ids(&lb.rank(&hosts, &ctx)), ["h1", "h3", "h2"]);
    }

    #[test]
    fn full_ties_keep_snapshot_order() {
        let lb = BusyConnections::new();
        let hosts = hosts_with_counts(&[(1, 1), (1, 1), (1, 1)]);

        assert_eq!(ids(&lb.rank(&hosts, &StaticContext::new())), ["h1", "h2", "h3"]);
    }

    #[test]
    fn empty_snapshot() {
        assert!(BusyConnections::new().choose(&[], &StaticContext::new()).is_none());
    }
}
