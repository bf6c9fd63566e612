//! One backend application assembled from configuration.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{ApplicationConfig, TimeoutConfig};
use crate::http::headers::HeaderNames;
use crate::load_balancer::{build_load_balancer, LoadBalancer, StrategyError};
use crate::origins::{AppId, InventoryError, OriginStats, OriginsInventory};

use super::{BackendServiceClient, HttpConnector, HttpHostFactory};

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("application {app}: {source}")]
    Strategy {
        app: AppId,
        #[source]
        source: StrategyError,
    },

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Inventory, strategy and client of one application.
pub struct Application {
    id: AppId,
    inventory: Arc<OriginsInventory>,
    load_balancer: Arc<dyn LoadBalancer>,
    client: BackendServiceClient,
}

impl Application {
    pub fn build(
        config: &ApplicationConfig,
        timeouts: &TimeoutConfig,
        headers: &HeaderNames,
    ) -> Result<Self, ApplicationError> {
        let id = AppId::from(config.id.as_str());
        let factory = HttpHostFactory::new(
            config.connection_pool.settings(),
            HttpConnector::new(timeouts.connect()),
        );
        let inventory = Arc::new(OriginsInventory::new(id.clone(), Arc::new(factory)));

        let stats = Arc::new(OriginStats::new());
        inventory.add_origins_change_listener(stats.clone());

        let load_balancer = build_load_balancer(&config.strategy, &inventory).map_err(|source| {
            ApplicationError::Strategy {
                app: id.clone(),
                source,
            }
        })?;

        inventory.set_origins(config.origins())?;

        let client = BackendServiceClient::new(
            id.clone(),
            inventory.clone(),
            load_balancer.clone(),
            stats,
            headers.clone(),
            config.max_attempts,
        );

        tracing::info!(
            app = %id,
            origins = config.origins.len(),
            strategy = load_balancer.name(),
            "Application configured"
        );

        Ok(Self {
            id,
            inventory,
            load_balancer,
            client,
        })
    }

    pub fn id(&self) -> &AppId {
        &self.id
    }

    pub fn inventory(&self) -> &Arc<OriginsInventory> {
        &self.inventory
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    pub fn client(&self) -> &BackendServiceClient {
        &self.client
    }

    /// Apply a reloaded origin list to the live inventory.
    pub fn update_origins(&self, config: &ApplicationConfig) -> Result<(), InventoryError> {
        self.inventory.set_origins(config.origins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OriginConfig, StrategyKind};
    use crate::origins::OriginState;

    fn config() -> ApplicationConfig {
        ApplicationConfig {
            id: "shop".into(),
            origins: vec![
                OriginConfig {
                    id: "s1".into(),
                    host: "127.0.0.1".into(),
                    port: 9001,
                },
                OriginConfig {
                    id: "s2".into(),
                    host: "127.0.0.1".into(),
                    port: 9002,
                },
            ],
            ..ApplicationConfig::default()
        }
    }

    #[test]
    fn builds_inventory_and_strategy() {
        let app = Application::build(&config(), &TimeoutConfig::default(), &HeaderNames::default())
            .unwrap();

        assert_eq!(app.id().as_str(), "shop");
        assert_eq!(app.load_balancer().name(), "adaptive");
        assert_eq!(app.client().app_id().as_str(), "shop");
        let origins = app.inventory().origins();
        assert_eq!(origins.len(), 2);
        assert!(origins.iter().all(|(_, state)| *state == OriginState::Active));
    }

    #[test]
    fn reload_replaces_origins() {
        let app = Application::build(&config(), &TimeoutConfig::default(), &HeaderNames::default())
            .unwrap();

        let mut reloaded = config();
        reloaded.origins.remove(0);
        app.update_origins(&reloaded).unwrap();

        let ids: Vec<_> = app
            .inventory()
            .origins()
            .into_iter()
            .map(|(origin, _)| origin.id().to_string())
            .collect();
        assert_eq!(ids, ["s2"]);
    }

    #[test]
    fn zero_warmup_rejected() {
        let mut bad = config();
        bad.strategy.kind = StrategyKind::Adaptive;
        bad.strategy.warmup_requests = 0;

        let result = Application::build(&bad, &TimeoutConfig::default(), &HeaderNames::default());
        assert!(matches!(result, Err(ApplicationError::Strategy { .. })));
    }
}
