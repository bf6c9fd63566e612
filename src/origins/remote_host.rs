//! An origin paired with its pool and client.

use std::fmt;
use std::sync::Arc;

use crate::backend::HostClient;
use crate::origins::{Origin, OriginId, OriginPool};

/// Load signal used by the power-of-two strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadBalancingMetric {
    ongoing_connections: usize,
}

impl LoadBalancingMetric {
    pub fn new(ongoing_connections: usize) -> Self {
        Self { ongoing_connections }
    }

    pub fn ongoing_connections(&self) -> usize {
        self.ongoing_connections
    }
}

/// One entry of an active-origins snapshot.
#[derive(Clone)]
pub struct RemoteHost {
    origin: Origin,
    pool: Arc<dyn OriginPool>,
    client: Arc<dyn HostClient>,
}

impl RemoteHost {
    pub fn new(origin: Origin, pool: Arc<dyn OriginPool>, client: Arc<dyn HostClient>) -> Self {
        Self {
            origin,
            pool,
            client,
        }
    }

    pub fn id(&self) -> &OriginId {
        self.origin.id()
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn pool(&self) -> &dyn OriginPool {
        self.pool.as_ref()
    }

    pub fn client(&self) -> &Arc<dyn HostClient> {
        &self.client
    }

    pub fn metric(&self) -> LoadBalancingMetric {
        LoadBalancingMetric::new(self.pool.leased_count())
    }
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("origin", &self.origin)
            .field("pool", &self.pool)
            .finish()
    }
}
