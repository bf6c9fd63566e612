//! Origin health state machine.
//!
//! # States
//! - Healthy: origin receives traffic
//! - Unhealthy: origin excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping
//! - Origins start healthy, matching a freshly added origin being active
//! - Counters reset on state transition

use dashmap::DashMap;

use crate::origins::OriginId;

/// Result of feeding one probe outcome into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameHealthy,
    BecameUnhealthy,
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    healthy: bool,
    successes: u32,
    failures: u32,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            healthy: true,
            successes: 0,
            failures: 0,
        }
    }
}

/// Consecutive-result counters for the origins of one application.
#[derive(Debug)]
pub struct HealthTracker {
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    origins: DashMap<OriginId, Counters>,
}

impl HealthTracker {
    /// Thresholds below one are treated as one.
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
            origins: DashMap::new(),
        }
    }

    /// Record one probe result; returns the transition it caused, if any.
    pub fn observe(&self, origin: &OriginId, success: bool) -> Option<Transition> {
        let mut counters = self.origins.entry(origin.clone()).or_default();
        if success {
            counters.failures = 0;
            counters.successes = counters.successes.saturating_add(1);
            if !counters.healthy && counters.successes >= self.healthy_threshold {
                counters.healthy = true;
                counters.successes = 0;
                return Some(Transition::BecameHealthy);
            }
        } else {
            counters.successes = 0;
            counters.failures = counters.failures.saturating_add(1);
            if counters.healthy && counters.failures >= self.unhealthy_threshold {
                counters.healthy = false;
                counters.failures = 0;
                return Some(Transition::BecameUnhealthy);
            }
        }
        None
    }

    /// Adopt the state the inventory reports, restarting the counters if it differs.
    pub fn align(&self, origin: &OriginId, healthy: bool) {
        let mut counters = self.origins.entry(origin.clone()).or_default();
        if counters.healthy != healthy {
            *counters = Counters {
                healthy,
                ..Counters::default()
            };
        }
    }

    pub fn is_healthy(&self, origin: &OriginId) -> bool {
        self.origins.get(origin).map_or(true, |c| c.healthy)
    }

    /// Forget origins that are no longer configured.
    pub fn retain(&self, known: &[OriginId]) {
        self.origins.retain(|id, _| known.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_below_threshold_do_not_flip() {
        let tracker = HealthTracker::new(2, 3);
        let o = OriginId::from("o1");

        assert_eq!(tracker.observe(&o, false), None);
        assert_eq!(tracker.observe(&o, false), None);
        assert_eq!(tracker.observe(&o, true), None);
        assert_eq!(tracker.observe(&o, false), None);
        assert!(tracker.is_healthy(&o));
    }

    #[test]
    fn flips_both_ways_on_consecutive_results() {
        let tracker = HealthTracker::new(2, 2);
        let o = OriginId::from("o1");

        assert_eq!(tracker.observe(&o, false), None);
        assert_eq!(tracker.observe(&o, false), Some(Transition::BecameUnhealthy));
        assert_eq!(tracker.observe(&o, false), None);
        assert!(!tracker.is_healthy(&o));

        assert_eq!(tracker.observe(&o, true), None);
        assert_eq!(tracker.observe(&o, true), Some(Transition::BecameHealthy));
        assert!(tracker.is_healthy(&o));
    }

    #[test]
    fn zero_threshold_acts_as_one() {
        let tracker = HealthTracker::new(0, 0);
        let o = OriginId::from("o1");
        assert_eq!(tracker.observe(&o, false), Some(Transition::BecameUnhealthy));
        assert_eq!(tracker.observe(&o, true), Some(Transition::BecameHealthy));
    }

    #[test]
    fn align_restarts_counters() {
        let tracker = HealthTracker::new(2, 2);
        let o = OriginId::from("o1");

        tracker.observe(&o, false);
        tracker.align(&o, false);
        assert!(!tracker.is_healthy(&o));
        assert_eq!(tracker.observe(&o, true), None);
        assert_eq!(tracker.observe(&o, true), Some(Transition::BecameHealthy));
    }

    #[test]
    fn retain_drops_unknown() {
        let tracker = HealthTracker::new(1, 1);
        tracker.observe(&OriginId::from("gone"), false);
        tracker.retain(&[OriginId::from("kept")]);
        assert!(tracker.is_healthy(&OriginId::from("gone")));
    }
}
