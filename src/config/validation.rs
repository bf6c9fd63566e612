//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, pool limits, warm-up)
//! - Detect duplicate application and origin ids
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::{ApplicationConfig, ProxyConfig, StrategyKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidBindAddress(String),
    InvalidHeaderName { field: &'static str, value: String },
    DuplicateApplication(String),
    EmptyApplicationId,
    InvalidPathPrefix { app: String, prefix: String },
    NoOrigins(String),
    DuplicateOrigin { app: String, origin: String },
    EmptyHost { app: String, origin: String },
    InvalidPort { app: String, origin: String },
    ZeroWarmup(String),
    ZeroLimit { app: String, field: &'static str },
    ZeroSetting(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidBindAddress(addr) => {
                write!(f, "listener.bind_address '{}' is not a socket address", addr)
            }
            ValidationError::InvalidHeaderName { field, value } => {
                write!(f, "headers.{} '{}' is not a valid header name", field, value)
            }
            ValidationError::DuplicateApplication(id) => {
                write!(f, "application '{}' is defined more than once", id)
            }
            ValidationError::EmptyApplicationId => write!(f, "application id must not be empty"),
            ValidationError::InvalidPathPrefix { app, prefix } => {
                write!(f, "application '{}': path_prefix '{}' must start with '/'", app, prefix)
            }
            ValidationError::NoOrigins(app) => {
                write!(f, "application '{}' has no origins", app)
            }
            ValidationError::DuplicateOrigin { app, origin } => {
                write!(f, "application '{}': origin '{}' is defined more than once", app, origin)
            }
            ValidationError::EmptyHost { app, origin } => {
                write!(f, "application '{}': origin '{}' has an empty host", app, origin)
            }
            ValidationError::InvalidPort { app, origin } => {
                write!(f, "application '{}': origin '{}' has port 0", app, origin)
            }
            ValidationError::ZeroWarmup(app) => {
                write!(f, "application '{}': adaptive warmup_requests must be at least 1", app)
            }
            ValidationError::ZeroLimit { app, field } => {
                write!(f, "application '{}': {} must be greater than 0", app, field)
            }
            ValidationError::ZeroSetting(field) => write!(f, "{} must be greater than 0", field),
        }
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    for (field, value) in [
        ("listener.max_initial_line_bytes", config.listener.max_initial_line_bytes as u64),
        ("listener.max_header_bytes", config.listener.max_header_bytes as u64),
        ("listener.max_headers", config.listener.max_headers as u64),
        ("timeouts.header_read_secs", config.timeouts.header_read_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroSetting(field));
        }
    }

    for (field, value) in [
        ("origin_id", &config.headers.origin_id),
        ("request_id", &config.headers.request_id),
    ] {
        if HeaderName::from_bytes(value.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidHeaderName {
                field,
                value: value.clone(),
            });
        }
    }

    let mut app_ids = HashSet::new();
    for app in &config.applications {
        if !app_ids.insert(app.id.as_str()) {
            errors.push(ValidationError::DuplicateApplication(app.id.clone()));
        }
        validate_application(app, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_application(app: &ApplicationConfig, errors: &mut Vec<ValidationError>) {
    if app.id.is_empty() {
        errors.push(ValidationError::EmptyApplicationId);
    }

    if !app.path_prefix.starts_with('/') {
        errors.push(ValidationError::InvalidPathPrefix {
            app: app.id.clone(),
            prefix: app.path_prefix.clone(),
        });
    }

    if app.strategy.kind == StrategyKind::Adaptive && app.strategy.warmup_requests == 0 {
        errors.push(ValidationError::ZeroWarmup(app.id.clone()));
    }

    let pool = &app.connection_pool;
    for (field, value) in [
        ("max_attempts", app.max_attempts as u64),
        ("max_connections_per_host", pool.max_connections_per_host as u64),
        (
            "max_pending_connections_per_host",
            pool.max_pending_connections_per_host as u64,
        ),
        ("pending_connection_timeout_ms", pool.pending_connection_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit {
                app: app.id.clone(),
                field,
            });
        }
    }

    if app.origins.is_empty() {
        errors.push(ValidationError::NoOrigins(app.id.clone()));
    }

    let mut origin_ids = HashSet::new();
    for origin in &app.origins {
        if !origin_ids.insert(origin.id.as_str()) {
            errors.push(ValidationError::DuplicateOrigin {
                app: app.id.clone(),
                origin: origin.id.clone(),
            });
        }
        if origin.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost {
                app: app.id.clone(),
                origin: origin.id.clone(),
            });
        }
        if origin.port == 0 {
            errors.push(ValidationError::InvalidPort {
                app: app.id.clone(),
                origin: origin.id.clone(),
            });
        }
    }
}
