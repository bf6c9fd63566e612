//! The set of origins serving one application.
//!
//! # Responsibilities
//! - Apply configuration updates by diffing origins on their id
//! - Track each origin's state (active, inactive, disabled)
//! - Publish the active set as an atomically swapped snapshot
//! - Tell listeners about every change before the new set becomes visible
//!
//! # Design Decisions
//! - Mutations are serialised by one mutex; reads go through `ArcSwap` and never block
//! - Listeners run synchronously on the mutating thread and must not call back
//!   into the inventory's mutating methods

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::observability::metrics;
use crate::origins::{AppId, Origin, OriginId, RemoteHost};

/// Source of active-origin snapshots for a routing decision.
pub trait ActiveOrigins: Send + Sync {
    /// The origins currently eligible for traffic, in inventory order.
    fn snapshot(&self) -> Vec<RemoteHost>;
}

impl ActiveOrigins for Vec<RemoteHost> {
    fn snapshot(&self) -> Vec<RemoteHost> {
        self.clone()
    }
}

/// Receives a notification whenever an application's origin set changes.
pub trait OriginsChangeListener: Send + Sync {
    fn origins_changed(&self, snapshot: &OriginsSnapshot);
}

/// Builds the pool and client for a newly added origin.
pub trait RemoteHostFactory: Send + Sync {
    fn create(&self, origin: &Origin) -> RemoteHost;
}

impl<F> RemoteHostFactory for F
where
    F: Fn(&Origin) -> RemoteHost + Send + Sync,
{
    fn create(&self, origin: &Origin) -> RemoteHost {
        self(origin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginState {
    /// Receiving traffic.
    Active,
    /// Failing health checks.
    Inactive,
    /// Taken out of rotation by an operator.
    Disabled,
}

impl OriginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginState::Active => "active",
            OriginState::Inactive => "inactive",
            OriginState::Disabled => "disabled",
        }
    }
}

/// Origins of one application grouped by state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginsSnapshot {
    pub app_id: AppId,
    pub active: Vec<Origin>,
    pub inactive: Vec<Origin>,
    pub disabled: Vec<Origin>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("application {app} must have at least one origin")]
    NoOrigins { app: AppId },

    #[error("origin {origin} is configured more than once for application {app}")]
    DuplicateOrigin { app: AppId, origin: OriginId },
}

struct MonitoredOrigin {
    host: RemoteHost,
    state: OriginState,
}

pub struct OriginsInventory {
    app_id: AppId,
    factory: Arc<dyn RemoteHostFactory>,
    origins: Mutex<Vec<MonitoredOrigin>>,
    active: ArcSwap<Vec<RemoteHost>>,
    listeners: Mutex<Vec<Arc<dyn OriginsChangeListener>>>,
}

impl OriginsInventory {
    pub fn new(app_id: AppId, factory: Arc<dyn RemoteHostFactory>) -> Self {
        Self {
            app_id,
            factory,
            origins: Mutex::new(Vec::new()),
            active: ArcSwap::from_pointee(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn add_origins_change_listener(&self, listener: Arc<dyn OriginsChangeListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Replace the configured origins.
    ///
    /// Origins are matched on id: unchanged ones keep their pool and state,
    /// changed ones get a fresh pool, removed ones have their pool closed.
    pub fn set_origins(&self, origins: Vec<Origin>) -> Result<(), InventoryError> {
        if origins.is_empty() {
            return Err(InventoryError::NoOrigins {
                app: self.app_id.clone(),
            });
        }
        let mut seen = HashMap::with_capacity(origins.len());
        for origin in &origins {
            if seen.insert(origin.id().clone(), ()).is_some() {
                return Err(InventoryError::DuplicateOrigin {
                    app: self.app_id.clone(),
                    origin: origin.id().clone(),
                });
            }
        }

        let mut current = self.origins.lock().unwrap_or_else(PoisonError::into_inner);
        let previous_order: Vec<OriginId> = current.iter().map(|m| m.host.id().clone()).collect();
        let mut previous: HashMap<OriginId, MonitoredOrigin> = current
            .drain(..)
            .map(|m| (m.host.id().clone(), m))
            .collect();

        let mut changed = false;
        let mut next = Vec::with_capacity(origins.len());
        for origin in origins {
            match previous.remove(origin.id()) {
                Some(existing) if existing.host.origin() == &origin => next.push(existing),
                Some(existing) => {
                    existing.host.pool().close();
                    tracing::info!(app = %self.app_id, origin = %origin, "Existing origin has been updated");
                    next.push(self.activate(&origin));
                    changed = true;
                }
                None => {
                    tracing::info!(app = %self.app_id, origin = %origin, "New origin added and activated");
                    next.push(self.activate(&origin));
                    changed = true;
                }
            }
        }

        for removed in previous.into_values() {
            removed.host.pool().close();
            tracing::info!(app = %self.app_id, origin = %removed.host.origin(), "Existing origin has been removed");
            changed = true;
        }

        *current = next;
        if changed || previous_order.iter().ne(current.iter().map(|m| m.host.id())) {
            self.publish(&current);
        }
        Ok(())
    }

    /// A health check passed: an inactive origin becomes active again.
    pub fn origin_healthy(&self, id: &OriginId) {
        self.transition(id, OriginState::Inactive, OriginState::Active, "Origin activated");
    }

    /// A health check failed: an active origin stops receiving traffic.
    pub fn origin_unhealthy(&self, id: &OriginId) {
        self.transition(id, OriginState::Active, OriginState::Inactive, "Origin deactivated");
    }

    pub fn disable_origin(&self, id: &OriginId) {
        let mut current = self.origins.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = current.iter_mut().find(|m| m.host.id() == id) else {
            tracing::debug!(app = %self.app_id, origin = %id, "Disable requested for unknown origin");
            return;
        };
        if entry.state == OriginState::Disabled {
            return;
        }
        entry.state = OriginState::Disabled;
        tracing::info!(app = %self.app_id, origin = %id, "Origin disabled");
        self.publish(&current);
    }

    /// Put a disabled origin back into rotation; health checks take over from there.
    pub fn enable_origin(&self, id: &OriginId) {
        self.transition(id, OriginState::Disabled, OriginState::Active, "Origin enabled");
    }

    /// Every configured origin with its state, in inventory order.
    pub fn origins(&self) -> Vec<(Origin, OriginState)> {
        self.origins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| (m.host.origin().clone(), m.state))
            .collect()
    }

    /// The current grouping by state, as listeners last saw it.
    pub fn state_snapshot(&self) -> OriginsSnapshot {
        let current = self.origins.lock().unwrap_or_else(PoisonError::into_inner);
        self.group(&current)
    }

    /// Close every pool and empty the inventory.
    pub fn close(&self) {
        let mut current = self.origins.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_empty() {
            return;
        }
        for origin in current.drain(..) {
            origin.host.pool().close();
        }
        tracing::info!(app = %self.app_id, "Origins inventory closed");
        self.publish(&current);
    }

    fn activate(&self, origin: &Origin) -> MonitoredOrigin {
        MonitoredOrigin {
            host: self.factory.create(origin),
            state: OriginState::Active,
        }
    }

    fn transition(&self, id: &OriginId, from: OriginState, to: OriginState, message: &'static str) {
        let mut current = self.origins.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = current.iter_mut().find(|m| m.host.id() == id) else {
            tracing::debug!(app = %self.app_id, origin = %id, "State change for unknown origin ignored");
            return;
        };
        if entry.state != from {
            return;
        }
        entry.state = to;
        tracing::info!(app = %self.app_id, origin = %id, state = to.as_str(), "{}", message);
        self.publish(&current);
    }

    fn group(&self, origins: &[MonitoredOrigin]) -> OriginsSnapshot {
        let mut snapshot = OriginsSnapshot {
            app_id: self.app_id.clone(),
            active: Vec::new(),
            inactive: Vec::new(),
            disabled: Vec::new(),
        };
        for m in origins {
            let bucket = match m.state {
                OriginState::Active => &mut snapshot.active,
                OriginState::Inactive => &mut snapshot.inactive,
                OriginState::Disabled => &mut snapshot.disabled,
            };
            bucket.push(m.host.origin().clone());
        }
        snapshot
    }

    /// Notify listeners, then make the new active set visible to readers.
    fn publish(&self, origins: &[MonitoredOrigin]) {
        let snapshot = self.group(origins);
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener.origins_changed(&snapshot);
        }

        for m in origins {
            metrics::record_origin_state(&self.app_id, m.host.id(), m.state);
        }

        let active = origins
            .iter()
            .filter(|m| m.state == OriginState::Active)
            .map(|m| m.host.clone())
            .collect();
        self.active.store(Arc::new(active));
    }
}

impl ActiveOrigins for OriginsInventory {
    fn snapshot(&self) -> Vec<RemoteHost> {
        self.active.load().as_ref().clone()
    }
}

impl fmt::Debug for OriginsInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginsInventory")
            .field("app_id", &self.app_id)
            .field("active", &self.active.load().len())
            .finish()
    }
}
