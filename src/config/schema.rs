//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::origins::{Origin, PoolSettings};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Names of the headers the proxy reads and writes.
    pub headers: HeadersConfig,

    /// Backend applications, each with its own origins and strategy.
    pub applications: Vec<ApplicationConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Longest accepted request line, in bytes.
    pub max_initial_line_bytes: usize,

    /// Largest accepted request head (request line plus headers), in bytes.
    pub max_header_bytes: usize,

    /// Most header fields accepted on one request.
    pub max_headers: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            max_initial_line_bytes: 4096,
            max_header_bytes: 8192,
            max_headers: 100,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Time allowed for an origin to produce response headers, in milliseconds.
    pub response_ms: u64,

    /// Time allowed for a client to send request headers, in seconds.
    pub header_read_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn header_read(&self) -> Duration {
        Duration::from_secs(self.header_read_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 2_000,
            response_ms: 11_000,
            header_read_secs: 30,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in milliseconds.
    pub interval_ms: u64,

    /// Health check timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 2_000,
            path: "/health".to_string(),
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Record metrics through the `metrics` facade.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}

/// Header names used on requests and responses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Set on responses to name the origin that served (or failed) them.
    pub origin_id: String,

    /// Carries the request id to origins and back to clients.
    pub request_id: String,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            origin_id: "x-origin-id".to_string(),
            request_id: "x-request-id".to_string(),
        }
    }
}

/// A backend service and the origins that serve it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Unique application identifier.
    pub id: String,

    /// Path prefix routed to this application.
    pub path_prefix: String,

    /// Host header to match (exact match). Any host when absent.
    pub host: Option<String>,

    /// Load balancing strategy.
    pub strategy: StrategyConfig,

    /// Distinct origins tried before giving up on a request.
    pub max_attempts: usize,

    pub connection_pool: ConnectionPoolConfig,

    pub origins: Vec<OriginConfig>,
}

impl ApplicationConfig {
    pub fn origins(&self) -> Vec<Origin> {
        self.origins
            .iter()
            .map(|o| Origin::new(o.id.as_str(), o.host.as_str(), o.port))
            .collect()
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            path_prefix: "/".to_string(),
            host: None,
            strategy: StrategyConfig::default(),
            max_attempts: 3,
            connection_pool: ConnectionPoolConfig::default(),
            origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RoundRobin,
    BusyConnections,
    PowerOfTwo,
    Adaptive,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyKind,

    /// Votes every origin takes part in before `adaptive` leaves round robin.
    pub warmup_requests: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Adaptive,
            warmup_requests: 100,
        }
    }
}

/// Per-origin connection pool limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Busy plus pending connections allowed per origin.
    pub max_connections_per_host: usize,

    /// Borrowers allowed to queue for a connection per origin.
    pub max_pending_connections_per_host: usize,

    /// How long a queued borrower waits, in milliseconds.
    pub pending_connection_timeout_ms: u64,
}

impl ConnectionPoolConfig {
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections_per_host: self.max_connections_per_host,
            max_pending_connections_per_host: self.max_pending_connections_per_host,
            pending_connection_timeout: Duration::from_millis(self.pending_connection_timeout_ms),
        }
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 50,
            max_pending_connections_per_host: 25,
            pending_connection_timeout_ms: 2_000,
        }
    }
}

/// One origin of an application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginConfig {
    /// Unique within the application.
    pub id: String,

    pub host: String,

    pub port: u16,
}
