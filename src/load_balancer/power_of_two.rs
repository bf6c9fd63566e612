//! Power-of-two-choices load balancing strategy.
//!
//! Two origins are drawn at random and the one with fewer ongoing connections
//! wins. Randomness comes from an injected [`RandomSource`] so selection is
//! reproducible under test.

use std::fmt::Debug;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::load_balancer::{LoadBalancer, LoadBalancingContext};
use crate::origins::RemoteHost;

/// Source of uniformly distributed indices.
pub trait RandomSource: Send + Sync + Debug {
    /// A value in `0..bound`. `bound` is never zero.
    fn next_index(&self, bound: usize) -> usize;
}

#[derive(Debug)]
pub struct SeededRandom(Mutex<StdRng>);

impl SeededRandom {
    pub fn from_entropy() -> Self {
        Self(Mutex::new(StdRng::from_entropy()))
    }

    pub fn seeded(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl RandomSource for SeededRandom {
    fn next_index(&self, bound: usize) -> usize {
        let mut rng = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(0..bound)
    }
}

#[derive(Debug)]
pub struct PowerOfTwo {
    random: Box<dyn RandomSource>,
}

impl PowerOfTwo {
    pub fn new(random: Box<dyn RandomSource>) -> Self {
        Self { random }
    }

    fn pick(&self, origins: &[RemoteHost]) -> Option<usize> {
        match origins.len() {
            0 => None,
            1 => Some(0),
            n => {
                // Out-of-range draws from a misbehaving source wrap instead of panicking
                let first = self.random.next_index(n) % n;
                let second = self.random.next_index(n) % n;
                let load = |i: usize| origins[i].metric().ongoing_connections();
                if load(second) < load(first) {
                    Some(second)
                } else {
                    Some(first)
                }
            }
        }
    }
}

impl Default for PowerOfTwo {
    fn default() -> Self {
        Self::new(Box::new(SeededRandom::from_entropy()))
    }
}

impl LoadBalancer for PowerOfTwo {
    fn rank(&self, origins: &[RemoteHost], _context: &dyn LoadBalancingContext) -> Vec<RemoteHost> {
        let Some(chosen) = self.pick(origins) else {
            return Vec::new();
        };

        let mut vote = Vec::with_capacity(origins.len());
        vote.push(origins[chosen].clone());
        vote.extend(
            origins
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != chosen)
                .map(|(_, host)| host.clone()),
        );
        vote
    }

    fn name(&self) -> &'static str {
        "power_of_two"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::load_balancer::context::testing::StaticContext;
    use crate::origins::testing::{hosts_with_counts, ids, stub_host, StubPool};
    use crate::origins::Origin;

    #[derive(Debug)]
    struct Scripted(Mutex<VecDeque<usize>>);

    impl Scripted {
        fn boxed(draws: &[usize]) -> Box<dyn RandomSource> {
            Box::new(Self(Mutex::new(draws.iter().copied().collect())))
        }
    }

    impl RandomSource for Scripted {
        fn next_index(&self, _bound: usize) -> usize {
            self.0.lock().unwrap().pop_front().expect("script exhausted")
        }
    }

    #[test]
    fn lower_metric_of_two_draws_wins() {
        let lb = PowerOfTwo::new(Scripted::boxed(&[2, 0]));
        let hosts = hosts_with_counts(&[(5, 0), (6, 0), (3, 0), (2, 0)]);

        let chosen = lb.choose(&hosts, &StaticContext::new()).unwrap();
        assert_eq!(chosen.id().as_str(), "h3");
    }

    #[test]
    fn pending_connections_count_as_ongoing() {
        let lb = PowerOfTwo::new(Scripted::boxed(&[0, 1]));
        let hosts = vec![
            stub_host(Origin::new("h1", "localhost", 9000), StubPool::with_counts(1, 0, 3)),
            stub_host(Origin::new("h2", "localhost", 9001), StubPool::with_counts(2, 0, 0)),
        ];

        assert_eq!(hosts[0].metric().ongoing_connections(), 4);
        assert_eq!(lb.choose(&hosts, &StaticContext::new()).unwrap().id().as_str(), "h2");
    }

    #[test]
    fn tie_goes_to_first_draw() {
        let lb = PowerOfTwo::new(Scripted::boxed(&[1, 0]));
        let hosts = hosts_with_counts(&[(4, 0), (4, 0)]);

        assert_eq!(lb.choose(&hosts, &StaticContext::new()).unwrap().id().as_str(), "h2");
    }

    #[test]
    fn rank_puts_choice_first() {
        let lb = PowerOfTwo::new(Scripted::boxed(&[3, 1]));
        let hosts = hosts_with_counts(&[(1, 0), (9, 0), (1, 0), (2, 0)]);

        assert_eq!(ids(&lb.rank(&hosts, &StaticContext::new())), ["h4", "h1", "h2", "h3"]);
    }

    #[test]
    fn single_origin_needs_no_draw() {
        let lb = PowerOfTwo::new(Scripted::boxed(&[]));
        let hosts = hosts_with_counts(&[(9, 0)]);

        assert_eq!(lb.choose(&hosts, &StaticContext::new()).unwrap().id().as_str(), "h1");
        assert!(lb.choose(&[], &StaticContext::new()).is_none());
    }

    #[test]
    fn same_seed_same_choices() {
        let hosts = hosts_with_counts(&[(3, 0), (1, 0), (4, 0), (1, 0), (5, 0)]);
        let ctx = StaticContext::new();
        let a = PowerOfTwo::new(Box::new(SeededRandom::seeded(7)));
        let b = PowerOfTwo::new(Box::new(SeededRandom::seeded(7)));

        for _ in 0..50 {
            assert_eq!(ids(&a.rank(&hosts, &ctx)), ids(&b.rank(&hosts, &ctx)));
        }
    }
}
