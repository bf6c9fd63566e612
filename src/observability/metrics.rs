//! Metrics emitted by the proxy.
//!
//! # Responsibilities
//! - Name every metric in one place
//! - Translate domain values (pool stats, origin state, statuses) into samples
//!
//! # Metrics
//! - `proxy_requests_total` (counter): finished requests by status class
//! - `proxy_outstanding_requests` (gauge): requests the pipeline is working on
//! - `proxy_requests_cancelled_total` (counter): responses abandoned, by reason
//! - `proxy_active_connections` (gauge): accepted client connections
//! - `proxy_origin_responses_total` (counter): origin exchanges by app, origin and status class
//! - `proxy_origin_health` (gauge): 0=active, 1=inactive, 2=disabled
//! - `proxy_pool_connections` (gauge): pool occupancy by origin and state
//!
//! # Design Decisions
//! - Samples go to whatever recorder the embedder installs; without one they are no-ops
//! - A process-wide switch mirrors `observability.metrics_enabled`

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use metrics::{counter, gauge};

use crate::origins::{AppId, OriginId, OriginState, PoolStats};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn sample recording on or off for the whole process.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// "2xx", "5xx", ... or "none" when no status was produced.
pub fn status_class(status: Option<StatusCode>) -> &'static str {
    match status.map(|s| s.as_u16() / 100) {
        Some(1) => "1xx",
        Some(2) => "2xx",
        Some(3) => "3xx",
        Some(4) => "4xx",
        Some(5) => "5xx",
        Some(_) => "other",
        None => "none",
    }
}

pub fn request_started() {
    if !is_enabled() {
        return;
    }
    gauge!("proxy_outstanding_requests").increment(1.0);
}

/// `None` means the request was terminated without a response.
pub fn request_completed(status: Option<StatusCode>) {
    if !is_enabled() {
        return;
    }
    gauge!("proxy_outstanding_requests").decrement(1.0);
    counter!("proxy_requests_total", "status" => status_class(status)).increment(1);
}

pub fn record_cancellation(reason: &'static str) {
    if !is_enabled() {
        return;
    }
    counter!("proxy_requests_cancelled_total", "reason" => reason).increment(1);
}

pub fn connection_opened() {
    if !is_enabled() {
        return;
    }
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    if !is_enabled() {
        return;
    }
    gauge!("proxy_active_connections").decrement(1.0);
}

pub fn record_origin_response(app: &AppId, origin: &OriginId, status: Option<StatusCode>) {
    if !is_enabled() {
        return;
    }
    counter!(
        "proxy_origin_responses_total",
        "app" => app.as_str().to_owned(),
        "origin" => origin.as_str().to_owned(),
        "status_class" => status_class(status)
    )
    .increment(1);
}

pub fn record_origin_state(app: &AppId, origin: &OriginId, state: OriginState) {
    if !is_enabled() {
        return;
    }
    let value = match state {
        OriginState::Active => 0.0,
        OriginState::Inactive => 1.0,
        OriginState::Disabled => 2.0,
    };
    gauge!(
        "proxy_origin_health",
        "app" => app.as_str().to_owned(),
        "origin" => origin.as_str().to_owned()
    )
    .set(value);
}

pub fn record_pool_stats(origin: &OriginId, stats: &PoolStats) {
    if !is_enabled() {
        return;
    }
    let samples = [
        ("busy", stats.busy),
        ("available", stats.available),
        ("pending", stats.pending),
        ("waiting", stats.waiting),
    ];
    for (state, value) in samples {
        gauge!(
            "proxy_pool_connections",
            "origin" => origin.as_str().to_owned(),
            "state" => state
        )
        .set(value as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(status_class(Some(StatusCode::OK)), "2xx");
        assert_eq!(status_class(Some(StatusCode::NOT_FOUND)), "4xx");
        assert_eq!(status_class(Some(StatusCode::GATEWAY_TIMEOUT)), "5xx");
        assert_eq!(status_class(None), "none");
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        request_started();
        request_completed(Some(StatusCode::OK));
        record_pool_stats(&OriginId::from("o1"), &PoolStats::default());
        record_origin_state(&AppId::from("app"), &OriginId::from("o1"), OriginState::Inactive);
    }
}
