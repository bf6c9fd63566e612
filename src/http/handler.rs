//! The handler seam between the pipeline and request dispatch.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

use crate::error::ProxyResult;

/// Produces a response for one request.
///
/// The returned future is owned by the pipeline and may be dropped at any
/// point when the client goes away.
pub trait HttpHandler: Send + Sync + 'static {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>>;
}

impl<H: HttpHandler + ?Sized> HttpHandler for Arc<H> {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>> {
        (**self).handle(request)
    }
}

/// Adapt an async closure into a handler.
pub struct HandlerFn<F>(pub F);

impl<F, Fut> HttpHandler for HandlerFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ProxyResult<Response<Body>>> + Send + 'static,
{
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>> {
        Box::pin((self.0)(request))
    }
}
