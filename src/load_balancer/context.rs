//! Per-request input to a load balancer.

use std::sync::Arc;

use crate::http::request::RequestInfo;
use crate::origins::{AppId, Origin, OriginStats};

/// What a strategy may know about the request being placed.
pub trait LoadBalancingContext: Send + Sync {
    fn app_id(&self) -> &AppId;

    /// The request being placed, absent for probes and tests.
    fn current_request(&self) -> Option<&RequestInfo>;

    /// 5xx responses per second from `origin` over the last minute.
    fn one_minute_rate_for_status_code_5xx(&self, _origin: &Origin) -> f64 {
        0.0
    }
}

/// Context built by the backend client for each dispatched request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    app_id: AppId,
    request: Option<RequestInfo>,
    stats: Option<Arc<OriginStats>>,
}

impl RequestContext {
    pub fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            request: None,
            stats: None,
        }
    }

    pub fn with_request(mut self, request: Option<RequestInfo>) -> Self {
        self.request = request;
        self
    }

    pub fn with_stats(mut self, stats: Arc<OriginStats>) -> Self {
        self.stats = Some(stats);
        self
    }
}

impl LoadBalancingContext for RequestContext {
    fn app_id(&self) -> &AppId {
        &self.app_id
    }

    fn current_request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    fn one_minute_rate_for_status_code_5xx(&self, origin: &Origin) -> f64 {
        self.stats
            .as_ref()
            .map(|stats| stats.one_minute_rate_for_status_code_5xx(origin.id()))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;
    use crate::origins::OriginId;

    /// Context with fixed error rates.
    #[derive(Debug)]
    pub(crate) struct StaticContext {
        app_id: AppId,
        rates: HashMap<OriginId, f64>,
    }

    impl StaticContext {
        pub(crate) fn new() -> Self {
            Self {
                app_id: AppId::from("app"),
                rates: HashMap::new(),
            }
        }

        pub(crate) fn with_rate(mut self, origin: &str, rate: f64) -> Self {
            self.rates.insert(OriginId::from(origin), rate);
            self
        }
    }

    impl LoadBalancingContext for StaticContext {
        fn app_id(&self) -> &AppId {
            &self.app_id
        }

        fn current_request(&self) -> Option<&RequestInfo> {
            None
        }

        fn one_minute_rate_for_status_code_5xx(&self, origin: &Origin) -> f64 {
            self.rates.get(origin.id()).copied().unwrap_or(0.0)
        }
    }
}
