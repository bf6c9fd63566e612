//! HTTP/1.1 connections to origins.
//!
//! # Responsibilities
//! - Open TCP connections with a connect timeout and run the HTTP/1.1 handshake
//! - Hand connections to the pool and classify transport failures
//! - Return a connection to its pool once the response body has been read
//!
//! # Design Decisions
//! - One hyper connection task per origin connection; the pool keeps the sender
//! - A response body dropped before its end closes the connection

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::backend::{HostClient, OriginExchange};
use crate::error::{ProxyError, ProxyResult};
use crate::origins::{
    ConnectionPool, Connector, Origin, OriginId, PoolSettings, PooledConnection, RemoteHost,
    RemoteHostFactory,
};

/// Largest response head accepted from an origin.
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HttpConnector {
    connect_timeout: Duration,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

pub struct HttpConnection {
    sender: http1::SendRequest<Body>,
}

impl Connector for HttpConnector {
    type Connection = HttpConnection;

    fn connect<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, ProxyResult<HttpConnection>> {
        Box::pin(async move {
            let failed = |source: crate::error::BoxError| ProxyError::OriginUnreachable {
                origin: origin.id().clone(),
                source,
            };

            let stream =
                match tokio::time::timeout(self.connect_timeout, TcpStream::connect(origin.authority())).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(failed(e.into())),
                    Err(_) => {
                        return Err(failed(
                            format!("connect timed out after {:?}", self.connect_timeout).into(),
                        ))
                    }
                };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(origin = %origin, error = %e, "Failed to set TCP_NODELAY");
            }

            let (sender, connection) = http1::Builder::new()
                .max_buf_size(MAX_RESPONSE_HEAD)
                .handshake(TokioIo::new(stream))
                .await
                .map_err(|e| failed(e.into()))?;

            let origin_id = origin.id().clone();
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::debug!(origin = %origin_id, error = %e, "Origin connection ended with error");
                }
            });

            tracing::trace!(origin = %origin, "Origin connection established");
            Ok(HttpConnection { sender })
        })
    }

    fn is_reusable(&self, connection: &HttpConnection) -> bool {
        !connection.sender.is_closed()
    }
}

/// `HostClient` backed by a `ConnectionPool`.
pub struct PooledHttpClient {
    pool: Arc<ConnectionPool<HttpConnector>>,
}

impl PooledHttpClient {
    pub fn new(pool: Arc<ConnectionPool<HttpConnector>>) -> Self {
        Self { pool }
    }
}

impl HostClient for PooledHttpClient {
    fn lease(&self) -> BoxFuture<'static, ProxyResult<Box<dyn OriginExchange>>> {
        let pool = Arc::clone(&self.pool);
        Box::pin(async move {
            let mut connection = pool.borrow().await?;
            if let Err(e) = connection.sender.ready().await {
                return Err(ProxyError::OriginUnreachable {
                    origin: connection.origin().id().clone(),
                    source: e.into(),
                });
            }
            Ok(Box::new(HttpExchange { connection }) as Box<dyn OriginExchange>)
        })
    }
}

struct HttpExchange {
    connection: PooledConnection<HttpConnector>,
}

impl OriginExchange for HttpExchange {
    fn send(self: Box<Self>, request: Request<Body>) -> BoxFuture<'static, ProxyResult<Response<Body>>> {
        let HttpExchange { mut connection } = *self;
        Box::pin(async move {
            let origin = connection.origin().id().clone();
            match connection.sender.send_request(request).await {
                Ok(response) => {
                    let (parts, incoming) = response.into_parts();
                    let body = ReleaseOnEnd {
                        inner: incoming,
                        connection: Some(connection),
                    };
                    Ok(Response::from_parts(parts, Body::new(body)))
                }
                Err(e) => Err(classify(origin, e)),
            }
        })
    }
}

fn classify(origin: OriginId, error: hyper::Error) -> ProxyError {
    if error.is_parse_too_large() {
        ProxyError::ContentOverflow {
            origin,
            limit: MAX_RESPONSE_HEAD,
        }
    } else if error.is_parse() || error.is_parse_status() {
        ProxyError::BadHttpResponse {
            origin,
            source: error.into(),
        }
    } else {
        ProxyError::TransportLost {
            origin,
            source: error.into(),
        }
    }
}

/// Response body that gives its connection back once fully read.
struct ReleaseOnEnd {
    inner: Incoming,
    connection: Option<PooledConnection<HttpConnector>>,
}

impl ReleaseOnEnd {
    fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.release();
        }
    }
}

impl HttpBody for ReleaseOnEnd {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, hyper::Error>>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        match &poll {
            Poll::Ready(None) => this.release(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.release(),
            // Dropping the guard without release closes the connection
            Poll::Ready(Some(Err(_))) => this.connection = None,
            _ => {}
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Builds pooled HTTP hosts for an inventory.
pub struct HttpHostFactory {
    settings: PoolSettings,
    connector: HttpConnector,
}

impl HttpHostFactory {
    pub fn new(settings: PoolSettings, connector: HttpConnector) -> Self {
        Self {
            settings,
            connector,
        }
    }
}

impl RemoteHostFactory for HttpHostFactory {
    fn create(&self, origin: &Origin) -> RemoteHost {
        let pool = Arc::new(ConnectionPool::new(
            origin.clone(),
            self.settings,
            self.connector.clone(),
        ));
        let client = Arc::new(PooledHttpClient::new(Arc::clone(&pool)));
        RemoteHost::new(origin.clone(), pool, client)
    }
}
