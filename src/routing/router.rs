//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store one route per application
//! - Look up the matching route for a request
//! - Dispatch to the application's handler or fail with `NoServiceConfigured`
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Host-specific routes are tried before wildcards, then longest prefix first
//! - O(n) scan in that order; first match wins

use std::cmp::Reverse;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

use crate::error::{ProxyError, ProxyResult};
use crate::http::handler::HttpHandler;
use crate::origins::AppId;

use super::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// A compiled route to one application.
pub struct Route {
    app: AppId,
    host: Option<String>,
    prefix: String,
    matcher: AndMatcher,
    handler: Arc<dyn HttpHandler>,
}

impl Route {
    pub fn new(
        app: AppId,
        host: Option<&str>,
        prefix: impl Into<String>,
        handler: Arc<dyn HttpHandler>,
    ) -> Self {
        let prefix = prefix.into();
        let mut matchers: Vec<Box<dyn Matcher>> = vec![Box::new(PathPrefixMatcher::new(&prefix))];
        if let Some(host) = host {
            matchers.push(Box::new(HostMatcher::new(host)));
        }
        Self {
            app,
            host: host.map(str::to_ascii_lowercase),
            prefix,
            matcher: AndMatcher::new(matchers),
            handler,
        }
    }

    pub fn app(&self) -> &AppId {
        &self.app
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("app", &self.app)
            .field("host", &self.host)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Picks the application for a request.
#[derive(Debug)]
pub struct ApplicationRouter {
    routes: Vec<Route>,
}

impl ApplicationRouter {
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by_key(|r| (r.host.is_none(), Reverse(r.prefix.len())));
        Self { routes }
    }

    pub fn route(&self, req: &Request<Body>) -> Option<&Route> {
        self.routes.iter().find(|r| r.matcher.matches(req))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// Dispatches every request to the handler of its route.
#[derive(Debug, Clone)]
pub struct RoutingHandler {
    router: Arc<ApplicationRouter>,
}

impl RoutingHandler {
    pub fn new(router: Arc<ApplicationRouter>) -> Self {
        Self { router }
    }
}

impl HttpHandler for RoutingHandler {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>> {
        match self.router.route(&request) {
            Some(route) => {
                tracing::trace!(app = %route.app, path = request.uri().path(), "Routed request");
                route.handler.handle(request)
            }
            None => {
                let path = request.uri().path().to_string();
                tracing::debug!(path = %path, "No application matches request");
                Box::pin(async move { Err(ProxyError::NoServiceConfigured { path }) })
            }
        }
    }
}
