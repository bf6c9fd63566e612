//! Stub pools and hosts shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::backend::{HostClient, OriginExchange};
use crate::error::{ProxyError, ProxyResult};
use crate::origins::{Origin, OriginPool, RemoteHost};

/// A pool whose counters are set directly by the test.
#[derive(Debug, Default)]
pub(crate) struct StubPool {
    busy: AtomicUsize,
    available: AtomicUsize,
    pending: AtomicUsize,
    exhausted: AtomicBool,
    closed: AtomicBool,
}

impl StubPool {
    pub(crate) fn idle() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_counts(busy: usize, available: usize, pending: usize) -> Arc<Self> {
        let pool = Self::default();
        pool.set_counts(busy, available, pending);
        Arc::new(pool)
    }

    pub(crate) fn exhausted() -> Arc<Self> {
        let pool = Self::default();
        pool.exhausted.store(true, Ordering::Relaxed);
        Arc::new(pool)
    }

    pub(crate) fn set_counts(&self, busy: usize, available: usize, pending: usize) {
        self.busy.store(busy, Ordering::Relaxed);
        self.available.store(available, Ordering::Relaxed);
        self.pending.store(pending, Ordering::Relaxed);
    }
}

impl OriginPool for StubPool {
    fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    fn available_count(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }

    fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn can_borrow_now(&self) -> bool {
        !self.exhausted.load(Ordering::Relaxed) && !self.closed.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// A client that must never be used.
pub(crate) struct UnusedClient;

impl HostClient for UnusedClient {
    fn lease(&self) -> BoxFuture<'static, ProxyResult<Box<dyn OriginExchange>>> {
        Box::pin(async { Err(ProxyError::Internal("stub host has no client".into())) })
    }
}

pub(crate) fn stub_host(origin: Origin, pool: Arc<StubPool>) -> RemoteHost {
    RemoteHost::new(origin, pool, Arc::new(UnusedClient))
}

/// Hosts named "h1".."hN" with the given `(busy, available)` counts.
pub(crate) fn hosts_with_counts(counts: &[(usize, usize)]) -> Vec<RemoteHost> {
    counts
        .iter()
        .enumerate()
        .map(|(i, &(busy, available))| {
            stub_host(
                Origin::new(format!("h{}", i + 1), "localhost", 9000 + i as u16),
                StubPool::with_counts(busy, available, 0),
            )
        })
        .collect()
}

pub(crate) fn ids(hosts: &[RemoteHost]) -> Vec<String> {
    hosts.iter().map(|h| h.id().to_string()).collect()
}
