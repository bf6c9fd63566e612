//! Dispatch of one request to an application's origins.
//!
//! # Responsibilities
//! - Ask the load balancer for a vote over the current active origins
//! - Try up to `max_attempts` origins in vote order until one accepts the request
//! - Tag the response with the origin id and record its status
//!
//! # Design Decisions
//! - Only failures before the request is written move on to the next origin;
//!   once bytes are on the wire the failure is the request's outcome
//! - Hop-by-hop headers are stripped in both directions

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, Uri, Version};
use futures_util::future::BoxFuture;

use crate::error::{ProxyError, ProxyResult};
use crate::http::handler::HttpHandler;
use crate::http::headers::{strip_hop_by_hop, HeaderNames};
use crate::http::request::RequestInfo;
use crate::load_balancer::{LoadBalancer, RequestContext};
use crate::observability::metrics;
use crate::origins::{ActiveOrigins, AppId, OriginStats, RemoteHost};

#[derive(Clone)]
pub struct BackendServiceClient {
    app_id: AppId,
    origins: Arc<dyn ActiveOrigins>,
    load_balancer: Arc<dyn LoadBalancer>,
    stats: Arc<OriginStats>,
    headers: HeaderNames,
    max_attempts: usize,
}

impl BackendServiceClient {
    pub fn new(
        app_id: AppId,
        origins: Arc<dyn ActiveOrigins>,
        load_balancer: Arc<dyn LoadBalancer>,
        stats: Arc<OriginStats>,
        headers: HeaderNames,
        max_attempts: usize,
    ) -> Self {
        Self {
            app_id,
            origins,
            load_balancer,
            stats,
            headers,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub async fn send(&self, mut request: Request<Body>) -> ProxyResult<Response<Body>> {
        let context = RequestContext::new(self.app_id.clone())
            .with_request(request.extensions().get::<RequestInfo>().cloned())
            .with_stats(Arc::clone(&self.stats));

        let snapshot = self.origins.snapshot();
        let vote = self.load_balancer.rank(&snapshot, &context);
        if vote.is_empty() {
            tracing::warn!(
                app = %self.app_id,
                origins = snapshot.len(),
                strategy = self.load_balancer.name(),
                "No origin available"
            );
            return Err(ProxyError::NoAvailableHosts {
                app: self.app_id.clone(),
            });
        }

        prepare_outbound(&mut request);

        let mut last_error = None;
        for host in vote.into_iter().take(self.max_attempts) {
            match host.client().lease().await {
                Ok(exchange) => {
                    if !request.headers().contains_key(header::HOST) {
                        if let Ok(value) = HeaderValue::from_str(&host.origin().authority()) {
                            request.headers_mut().insert(header::HOST, value);
                        }
                    }
                    let result = exchange.send(request).await;
                    return self.complete(&host, result);
                }
                Err(error) => {
                    tracing::warn!(
                        app = %self.app_id,
                        origin = %host.id(),
                        error = %error,
                        "Could not obtain origin connection, trying next origin"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProxyError::NoAvailableHosts {
            app: self.app_id.clone(),
        }))
    }

    fn complete(
        &self,
        host: &RemoteHost,
        result: ProxyResult<Response<Body>>,
    ) -> ProxyResult<Response<Body>> {
        match result {
            Ok(mut response) => {
                let status = response.status();
                self.stats.record_status(host.id(), status);
                metrics::record_origin_response(&self.app_id, host.id(), Some(status));

                let headers = response.headers_mut();
                strip_hop_by_hop(headers);
                if let Ok(value) = HeaderValue::from_str(host.id().as_str()) {
                    headers.insert(self.headers.origin_id.clone(), value);
                }
                Ok(response)
            }
            Err(error) => {
                metrics::record_origin_response(&self.app_id, host.id(), None);
                tracing::info!(
                    app = %self.app_id,
                    origin = %host.id(),
                    error = %error,
                    "Origin exchange failed"
                );
                Err(error)
            }
        }
    }
}

/// Rewrite a client request for an origin connection.
fn prepare_outbound(request: &mut Request<Body>) {
    strip_hop_by_hop(request.headers_mut());
    *request.version_mut() = Version::HTTP_11;

    // Origin-form request target
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    if let Ok(uri) = target.parse::<Uri>() {
        *request.uri_mut() = uri;
    }
}

impl HttpHandler for BackendServiceClient {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>> {
        let client = self.clone();
        Box::pin(async move { client.send(request).await })
    }
}
