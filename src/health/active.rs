//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every origin of every application
//! - Feed results through `HealthTracker` and move origins between
//!   active and inactive in their inventory

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::origins::{Origin, OriginId, OriginState, OriginsInventory};

use super::state::{HealthTracker, Transition};

struct Target {
    inventory: Arc<OriginsInventory>,
    tracker: HealthTracker,
}

pub struct HealthMonitor {
    targets: Vec<Target>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(inventories: Vec<Arc<OriginsInventory>>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let targets = inventories
            .into_iter()
            .map(|inventory| Target {
                inventory,
                tracker: HealthTracker::new(config.healthy_threshold, config.unhealthy_threshold),
            })
            .collect();

        Self {
            targets,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            path = %self.config.path,
            applications = self.targets.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every non-disabled origin once and apply the outcomes.
    pub async fn check_all(&self) {
        for target in &self.targets {
            let origins = target.inventory.origins();
            let known: Vec<OriginId> = origins.iter().map(|(o, _)| o.id().clone()).collect();
            target.tracker.retain(&known);

            let probes = origins
                .into_iter()
                .filter(|(_, state)| *state != OriginState::Disabled)
                .map(|(origin, state)| async move {
                    let healthy = self.probe(&origin).await;
                    (origin, state, healthy)
                });

            for (origin, state, healthy) in join_all(probes).await {
                target.tracker.align(origin.id(), state == OriginState::Active);
                match target.tracker.observe(origin.id(), healthy) {
                    Some(Transition::BecameHealthy) => target.inventory.origin_healthy(origin.id()),
                    Some(Transition::BecameUnhealthy) => {
                        target.inventory.origin_unhealthy(origin.id())
                    }
                    None => {}
                }
            }
        }
    }

    async fn probe(&self, origin: &Origin) -> bool {
        let uri = format!("http://{}{}", origin.authority(), self.config.path);
        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::USER_AGENT, "dispatch-proxy-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(origin = %origin.id(), error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout: Duration = self.config.timeout();
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(origin = %origin.id(), status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(origin = %origin.id(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(origin = %origin.id(), "Health check failed: timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::origins::testing::{stub_host, StubPool};
    use crate::origins::AppId;

    /// Answers every connection with the status currently stored in `status`.
    async fn switchable_origin(status: Arc<AtomicU16>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let status = status.load(Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    fn inventory(port: u16) -> Arc<OriginsInventory> {
        let inventory = Arc::new(OriginsInventory::new(
            AppId::from("app"),
            Arc::new(|o: &Origin| stub_host(o.clone(), StubPool::idle())),
        ));
        inventory
            .set_origins(vec![Origin::new("o1", "127.0.0.1", port)])
            .unwrap();
        inventory
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            healthy_threshold: 2,
            unhealthy_threshold: 2,
            timeout_ms: 500,
            ..HealthCheckConfig::default()
        }
    }

    fn state(inventory: &OriginsInventory) -> OriginState {
        inventory.origins()[0].1
    }

    #[tokio::test]
    async fn failing_origin_deactivated_then_recovers() {
        let status = Arc::new(AtomicU16::new(503));
        let port = switchable_origin(status.clone()).await;
        let inventory = inventory(port);
        let monitor = HealthMonitor::new(vec![inventory.clone()], config());

        monitor.check_all().await;
        assert_eq!(state(&inventory), OriginState::Active);
        monitor.check_all().await;
        assert_eq!(state(&inventory), OriginState::Inactive);

        status.store(200, Ordering::SeqCst);
        monitor.check_all().await;
        assert_eq!(state(&inventory), OriginState::Inactive);
        monitor.check_all().await;
        assert_eq!(state(&inventory), OriginState::Active);
    }

    #[tokio::test]
    async fn disabled_origin_not_probed() {
        let status = Arc::new(AtomicU16::new(500));
        let port = switchable_origin(status).await;
        let inventory = inventory(port);
        inventory.disable_origin(&OriginId::from("o1"));
        let monitor = HealthMonitor::new(vec![inventory.clone()], config());

        monitor.check_all().await;
        monitor.check_all().await;
        assert_eq!(state(&inventory), OriginState::Disabled);
    }

    #[tokio::test]
    async fn refused_connection_counts_as_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let inventory = inventory(port);
        let monitor = HealthMonitor::new(vec![inventory.clone()], config());
        monitor.check_all().await;
        monitor.check_all().await;
        assert_eq!(state(&inventory), OriginState::Inactive);
    }
}
