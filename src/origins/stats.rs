//! Per-origin response statistics.
//!
//! # Responsibilities
//! - Count 5xx responses per origin over a sliding one-minute window
//! - Answer "5xx responses per second over the last minute" for load balancing
//!
//! # Design Decisions
//! - Twelve five-second buckets; a bucket is recycled lazily when its slot comes round
//! - Reads never mutate, so rate lookups take only a shard read lock

use std::collections::HashSet;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use dashmap::DashMap;

use crate::origins::{OriginId, OriginsChangeListener, OriginsSnapshot};

const BUCKETS: usize = 12;
const BUCKET_WIDTH: Duration = Duration::from_secs(5);
const WINDOW_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    slot: u64,
    count: u64,
}

#[derive(Debug, Default)]
struct SlidingWindow {
    buckets: [Bucket; BUCKETS],
}

impl SlidingWindow {
    fn record(&mut self, slot: u64) {
        let bucket = &mut self.buckets[(slot % BUCKETS as u64) as usize];
        if bucket.slot != slot {
            *bucket = Bucket { slot, count: 0 };
        }
        bucket.count += 1;
    }

    fn total(&self, slot: u64) -> u64 {
        self.buckets
            .iter()
            .filter(|b| b.count > 0 && b.slot <= slot && b.slot + (BUCKETS as u64) > slot)
            .map(|b| b.count)
            .sum()
    }
}

/// 5xx response rates for every origin seen by one application.
#[derive(Debug)]
pub struct OriginStats {
    epoch: Instant,
    server_errors: DashMap<OriginId, SlidingWindow>,
}

impl OriginStats {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            server_errors: DashMap::new(),
        }
    }

    /// Record the status of a response received from `origin`.
    pub fn record_status(&self, origin: &OriginId, status: StatusCode) {
        self.record_status_at(origin, status, Instant::now());
    }

    pub fn one_minute_rate_for_status_code_5xx(&self, origin: &OriginId) -> f64 {
        self.rate_at(origin, Instant::now())
    }

    fn record_status_at(&self, origin: &OriginId, status: StatusCode, now: Instant) {
        if !status.is_server_error() {
            return;
        }
        let slot = self.slot(now);
        self.server_errors
            .entry(origin.clone())
            .or_default()
            .record(slot);
    }

    fn rate_at(&self, origin: &OriginId, now: Instant) -> f64 {
        let slot = self.slot(now);
        self.server_errors
            .get(origin)
            .map(|window| window.total(slot) as f64 / WINDOW_SECS)
            .unwrap_or(0.0)
    }

    fn slot(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_secs() / BUCKET_WIDTH.as_secs()
    }
}

impl Default for OriginStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Origins that left the inventory lose their history.
impl OriginsChangeListener for OriginStats {
    fn origins_changed(&self, snapshot: &OriginsSnapshot) {
        let known: HashSet<&OriginId> = snapshot
            .active
            .iter()
            .chain(&snapshot.inactive)
            .chain(&snapshot.disabled)
            .map(|origin| origin.id())
            .collect();
        self.server_errors.retain(|id, _| known.contains(id));
    }
}
