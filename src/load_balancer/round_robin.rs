//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::{LoadBalancer, LoadBalancingContext};
use crate::origins::RemoteHost;

/// Round-robin selector.
/// Stores an internal counter to rotate through origins.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn rank(&self, origins: &[RemoteHost], _context: &dyn LoadBalancingContext) -> Vec<RemoteHost> {
        if origins.is_empty() {
            return Vec::new();
        }

        // Start position is taken over the unfiltered snapshot
        let start = self.counter.fetch_add(1, Ordering::Relaxed) % origins.len();

        origins[start..]
            .iter()
            .chain(&origins[..start])
            .filter(|host| host.pool().can_borrow_now())
            .cloned()
            .collect()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::context::testing::StaticContext;
    use crate::origins::testing::{hosts_with_counts, ids, stub_host, StubPool};
    use crate::origins::Origin;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let ctx = StaticContext::new();
        let hosts = hosts_with_counts(&[(0, 0), (0, 0), (0, 0)]);

        assert_eq!(ids(&lb.rank(&hosts, &ctx)), ["h1", "h2", "h3"]);
        assert_eq!(ids(&lb.rank(&hosts, &ctx)), ["h2", "h3", "h1"]);
        assert_eq!(ids(&lb.rank(&hosts, &ctx)), ["h3", "h1", "h2"]);
        assert_eq!(lb.choose(&hosts, &ctx).unwrap().id().as_str(), "h1");
    }

    #[test]
    fn each_origin_chosen_equally_often() {
        let lb = RoundRobin::new();
        let ctx = StaticContext::new();
        let hosts = hosts_with_counts(&[(0, 0), (0, 0), (0, 0), (0, 0)]);

        let mut counts = std::collections::HashMap::new();
        for _ in 0..400 {
            let chosen = lb.choose(&hosts, &ctx).unwrap();
            *counts.entry(chosen.id().to_string()).or_insert(0) += 1;
        }
        assert!(counts.values().all(|&n| n == 100));
    }

    #[test]
    fn exhausted_origin_skipped() {
        let lb = RoundRobin::new();
        let ctx = StaticContext::new();
        let hosts = vec![
            stub_host(Origin::new("a", "localhost", 1), StubPool::idle()),
            stub_host(Origin::new("b", "localhost", 2), StubPool::exhausted()),
            stub_host(Origin::new("c", "localhost", 3), StubPool::idle()),
        ];

        assert_eq!(ids(&lb.rank(&hosts, &ctx)), ["a", "c"]);
        // Cursor at b: rotation starts there and b is filtered out
        assert_eq!(ids(&lb.rank(&hosts, &ctx)), ["c", "a"]);
        assert_eq!(ids(&lb.rank(&hosts, &ctx)), ["c", "a"]);
    }

    #[test]
    fn all_exhausted_gives_empty_vote() {
        let lb = RoundRobin::new();
        let ctx = StaticContext::new();
        let hosts = vec![stub_host(Origin::new("a", "localhost", 1), StubPool::exhausted())];

        assert!(lb.rank(&hosts, &ctx).is_empty());
        assert!(lb.choose(&hosts, &ctx).is_none());
    }

    #[test]
    fn every_origin_exhausted_from_any_start() {
        let lb = RoundRobin::new();
        let ctx = StaticContext::new();
        let hosts = vec![
            stub_host(Origin::new("a", "localhost", 1), StubPool::exhausted()),
            stub_host(Origin::new("b", "localhost", 2), StubPool::exhausted()),
            stub_host(Origin::new("c", "localhost", 3), StubPool::exhausted()),
        ];

        for _ in 0..hosts.len() {
            assert!(lb.rank(&hosts, &ctx).is_empty());
        }
        assert!(lb.choose(&hosts, &ctx).is_none());
    }

    #[test]
    fn empty_snapshot() {
        let lb = RoundRobin::new();
        assert!(lb.rank(&[], &StaticContext::new()).is_empty());
    }
}
