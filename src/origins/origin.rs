//! Origin identity types.
//!
//! # Responsibilities
//! - Name one backend instance (`OriginId`) and the application it serves (`AppId`)
//! - Carry the network address used by the connector
//!
//! # Design Decisions
//! - `Origin` is immutable; a configuration change replaces it wholesale
//! - Ids are cheap to clone (`Arc<str>`) since they key every counter and map

use std::fmt;
use std::sync::Arc;

/// Identifier of one backend origin, unique within its application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginId(Arc<str>);

impl OriginId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OriginId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OriginId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Identifier of an application (a backend service with its own origin set).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppId(Arc<str>);

impl AppId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AppId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// A single backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    id: OriginId,
    host: String,
    port: u16,
}

impl Origin {
    pub fn new(id: impl Into<OriginId>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    pub fn id(&self) -> &OriginId {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, as used for connecting and for the `Host` of health probes.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.id, self.host, self.port)
    }
}
