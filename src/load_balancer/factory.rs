//! Build the configured strategy for an application.

use std::sync::Arc;

use crate::config::{StrategyConfig, StrategyKind};
use crate::load_balancer::{
    Adaptive, BusyConnections, LoadBalancer, PowerOfTwo, RoundRobin, StrategyError,
};
use crate::origins::OriginsInventory;

/// Create the strategy described by `config`.
///
/// Strategies that keep per-origin state are registered with `inventory` so
/// they observe origin changes before any later vote.
pub fn build_load_balancer(
    config: &StrategyConfig,
    inventory: &OriginsInventory,
) -> Result<Arc<dyn LoadBalancer>, StrategyError> {
    let strategy: Arc<dyn LoadBalancer> = match config.kind {
        StrategyKind::RoundRobin => Arc::new(RoundRobin::new()),
        StrategyKind::BusyConnections => Arc::new(BusyConnections::new()),
        StrategyKind::PowerOfTwo => Arc::new(PowerOfTwo::default()),
        StrategyKind::Adaptive => {
            let adaptive = Arc::new(Adaptive::new(config.warmup_requests)?);
            inventory.add_origins_change_listener(adaptive.clone());
            adaptive
        }
    };

    tracing::debug!(app = %inventory.app_id(), strategy = strategy.name(), "Load balancer created");
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origins::testing::{stub_host, StubPool};
    use crate::origins::{AppId, Origin};

    fn inventory() -> OriginsInventory {
        OriginsInventory::new(
            AppId::from("app"),
            Arc::new(|origin: &Origin| stub_host(origin.clone(), StubPool::idle())),
        )
    }

    #[test]
    fn builds_each_kind() {
        let inventory = inventory();
        for (kind, name) in [
            (StrategyKind::RoundRobin, "round_robin"),
            (StrategyKind::BusyConnections, "busy_connections"),
            (StrategyKind::PowerOfTwo, "power_of_two"),
            (StrategyKind::Adaptive, "adaptive"),
        ] {
            let config = StrategyConfig {
                kind,
                warmup_requests: 5,
            };
            assert_eq!(build_load_balancer(&config, &inventory).unwrap().name(), name);
        }
    }

    #[test]
    fn adaptive_with_zero_warmup_fails() {
        let config = StrategyConfig {
            kind: StrategyKind::Adaptive,
            warmup_requests: 0,
        };
        assert!(matches!(
            build_load_balancer(&config, &inventory()),
            Err(StrategyError::InvalidWarmup(0))
        ));
    }
}
