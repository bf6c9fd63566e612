//! Per-origin connection pooling.
//!
//! # Responsibilities
//! - Lend connections to one origin, establishing new ones through a `Connector`
//! - Enforce `max_connections_per_host` over busy + pending connections
//! - Queue a bounded number of borrowers while the pool is at capacity
//! - Expose the live `{busy, available, pending}` counters load balancers rank on
//!
//! # Design Decisions
//! - Counters are plain atomics; readers get a best-effort snapshot, never a lock
//! - Slots are reserved with a CAS loop and released by RAII guards, so a
//!   borrower dropped mid-connect still gives its slot back
//! - A connection dropped without `release()` is assumed poisoned and closed

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::Notify;

use crate::error::{ProxyError, ProxyResult};
use crate::observability::metrics;
use crate::origins::Origin;

/// Read-only view of a pool, as consumed by load balancing strategies.
pub trait OriginPool: Send + Sync + fmt::Debug {
    /// Connections currently lent out.
    fn busy_count(&self) -> usize;

    /// Idle connections ready for reuse.
    fn available_count(&self) -> usize;

    /// Connections being established.
    fn pending_count(&self) -> usize;

    /// Whether a borrow right now would succeed without waiting.
    fn can_borrow_now(&self) -> bool;

    /// The load signal strategies rank on.
    fn leased_count(&self) -> usize {
        self.busy_count() + self.pending_count()
    }

    /// Stop lending and drop idle connections. Lent connections are closed on return.
    fn close(&self) {}
}

/// Establishes connections to an origin.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, ProxyResult<Self::Connection>>;

    /// Whether an idle connection may be handed out again.
    fn is_reusable(&self, connection: &Self::Connection) -> bool;
}

/// Limits applied to one origin's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections_per_host: usize,
    /// Borrowers allowed to queue while the pool is at capacity.
    pub max_pending_connections_per_host: usize,
    pub pending_connection_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections_per_host: 50,
            max_pending_connections_per_host: 25,
            pending_connection_timeout: Duration::from_millis(2000),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub busy: usize,
    pub available: usize,
    pub pending: usize,
    pub waiting: usize,
    pub connection_attempts: u64,
    pub connection_failures: u64,
    pub closed_connections: u64,
}

/// A pool of connections to a single origin.
pub struct ConnectionPool<C: Connector> {
    origin: Origin,
    settings: PoolSettings,
    connector: C,
    idle: Mutex<VecDeque<C::Connection>>,
    /// busy + pending; the quantity bounded by `max_connections_per_host`.
    leased: AtomicUsize,
    busy: AtomicUsize,
    pending: AtomicUsize,
    available: AtomicUsize,
    waiting: AtomicUsize,
    connection_attempts: AtomicU64,
    connection_failures: AtomicU64,
    closed_connections: AtomicU64,
    closed: AtomicBool,
    slot_released: Notify,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(origin: Origin, settings: PoolSettings, connector: C) -> Self {
        tracing::debug!(
            origin = %origin,
            max_connections = settings.max_connections_per_host,
            max_pending = settings.max_pending_connections_per_host,
            "Connection pool created"
        );
        Self {
            origin,
            settings,
            connector,
            idle: Mutex::new(VecDeque::new()),
            leased: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            available: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            connection_attempts: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            closed_connections: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            slot_released: Notify::new(),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            busy: self.busy.load(Ordering::Relaxed),
            available: self.available.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            closed_connections: self.closed_connections.load(Ordering::Relaxed),
        }
    }

    /// Borrow a connection, reusing an idle one when possible.
    ///
    /// Waits up to `pending_connection_timeout` when the pool is at capacity.
    pub async fn borrow(self: &Arc<Self>) -> ProxyResult<PooledConnection<C>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.exhausted("pool closed"));
        }

        let slot = match self.try_reserve() {
            Some(slot) => slot,
            None => self.wait_for_slot().await?,
        };

        if let Some(connection) = self.take_idle() {
            return Ok(self.lend(connection, slot));
        }

        self.pending.fetch_add(1, Ordering::Relaxed);
        let pending = CounterGuard(&self.pending);
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);

        let result = self.connector.connect(&self.origin).await;
        drop(pending);

        match result {
            Ok(connection) => Ok(self.lend(connection, slot)),
            Err(e) => {
                self.connection_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(origin = %self.origin, error = %e, "Failed to establish origin connection");
                Err(e)
            }
        }
    }

    fn lend(self: &Arc<Self>, connection: C::Connection, slot: LeaseSlot<C>) -> PooledConnection<C> {
        self.busy.fetch_add(1, Ordering::Relaxed);
        metrics::record_pool_stats(self.origin.id(), &self.stats());
        PooledConnection {
            pool: Arc::clone(self),
            connection: Some(connection),
            reuse: false,
            _slot: slot,
        }
    }

    /// Reserve one of the `max_connections_per_host` slots without waiting.
    fn try_reserve(self: &Arc<Self>) -> Option<LeaseSlot<C>> {
        let mut prev = self.leased.load(Ordering::Relaxed);
        loop {
            if prev >= self.settings.max_connections_per_host {
                return None;
            }
            match self.leased.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(LeaseSlot {
            pool: Arc::clone(self),
        })
    }

    async fn wait_for_slot(self: &Arc<Self>) -> ProxyResult<LeaseSlot<C>> {
        let queued = self.waiting.fetch_add(1, Ordering::Relaxed);
        let _waiting = CounterGuard(&self.waiting);
        if queued >= self.settings.max_pending_connections_per_host {
            return Err(self.exhausted("maximum pending borrowers reached"));
        }

        let deadline = tokio::time::Instant::now() + self.settings.pending_connection_timeout;
        loop {
            let notified = self.slot_released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(slot) = self.try_reserve() {
                return Ok(slot);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(self.exhausted("timed out waiting for a connection"));
            }
        }
    }

    fn take_idle(&self) -> Option<C::Connection> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(connection) = idle.pop_front() {
            self.available.fetch_sub(1, Ordering::Relaxed);
            if self.connector.is_reusable(&connection) {
                return Some(connection);
            }
            self.closed_connections.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn return_connection(&self, connection: C::Connection) {
        if self.closed.load(Ordering::Acquire) || !self.connector.is_reusable(&connection) {
            self.discard(connection);
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        idle.push_back(connection);
        self.available.fetch_add(1, Ordering::Relaxed);
    }

    fn discard(&self, connection: C::Connection) {
        drop(connection);
        self.closed_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn exhausted(&self, reason: &'static str) -> ProxyError {
        ProxyError::ResourceExhausted {
            origin: self.origin.id().clone(),
            reason,
        }
    }
}

impl<C: Connector> OriginPool for ConnectionPool<C> {
    fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    fn available_count(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }

    fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Every borrow reserves a slot first, idle connections included.
    fn can_borrow_now(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self.leased.load(Ordering::Relaxed) < self.settings.max_connections_per_host
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            idle.drain(..).collect()
        };
        self.available.fetch_sub(drained.len(), Ordering::Relaxed);
        for connection in drained {
            self.discard(connection);
        }
        self.slot_released.notify_waiters();
        tracing::debug!(origin = %self.origin, "Connection pool closed");
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("origin", &self.origin)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Decrements a counter when dropped.
struct CounterGuard<'a>(&'a AtomicUsize);

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One reserved unit of pool capacity.
struct LeaseSlot<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
}

impl<C: Connector> Drop for LeaseSlot<C> {
    fn drop(&mut self) {
        self.pool.leased.fetch_sub(1, Ordering::AcqRel);
        self.pool.slot_released.notify_one();
    }
}

/// A connection lent out by a `ConnectionPool`.
///
/// Call [`release`](Self::release) once the exchange completed cleanly so the
/// connection can be reused; dropping the guard closes it instead.
pub struct PooledConnection<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    connection: Option<C::Connection>,
    reuse: bool,
    // Dropped after `Drop::drop` runs, so the idle queue is refilled before
    // a waiting borrower is woken.
    _slot: LeaseSlot<C>,
}

impl<C: Connector> PooledConnection<C> {
    pub fn origin(&self) -> &Origin {
        &self.pool.origin
    }

    /// Hand the connection back for reuse.
    pub fn release(mut self) {
        self.reuse = true;
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("reuse", &self.reuse)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection is present until the guard drops")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection is present until the guard drops")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.reuse {
                self.pool.return_connection(connection);
            } else {
                self.pool.discard(connection);
            }
        }
        self.pool.busy.fetch_sub(1, Ordering::Relaxed);
        metrics::record_pool_stats(self.pool.origin.id(), &self.pool.stats());
    }
}
