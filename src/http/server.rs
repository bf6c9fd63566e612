//! Connection server for the proxy.
//!
//! # Responsibilities
//! - Build every application (inventory, strategy, client) from configuration
//! - Compose the request handler: response timeout → router → application client
//! - Accept connections and serve each one over hyper's HTTP/1.1 codec,
//!   with a pipeline driver deciding what each request gets back
//! - Write the pipeline's rejection on the raw socket when a request head is
//!   refused before the codec could parse it
//! - Apply reloaded origin lists to the live inventories
//! - Drain connections on shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::InvalidHeaderName;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use crate::backend::{Application, ApplicationError};
use crate::config::ProxyConfig;
use crate::error::{BadRequestKind, ProxyError};
use crate::health::HealthMonitor;
use crate::http::client_io::{ClientIo, HeadLimits};
use crate::http::headers::HeaderNames;
use crate::http::pipeline::{
    Event, MetricsProgressListener, PipelineDriver, PipelineEvent, RequestProgressListener,
};
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::resilience::TimeoutHandler;
use crate::routing::{ApplicationRouter, Route, RoutingHandler};

/// How long shutdown waits for open connections before giving up on them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Smallest read buffer handed to the codec, hyper's own default.
const CODEC_READ_BUFFER: usize = 400 * 1024;

/// How long a rejected client gets to read the response before the socket closes.
const REJECTION_LINGER: Duration = Duration::from_secs(1);

/// Largest synthesized body written on the raw socket.
const MAX_REJECTION_BODY: usize = 64 * 1024;

type ProxyHandler = TimeoutHandler<RoutingHandler>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid header name: {0}")]
    HeaderName(#[from] InvalidHeaderName),

    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Everything a connection task needs, shared by all of them.
struct ConnectionContext {
    handler: Arc<ProxyHandler>,
    headers: HeaderNames,
    progress: Arc<dyn RequestProgressListener>,
    head_limits: HeadLimits,
}

/// The reverse proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    applications: Vec<Application>,
    context: Arc<ConnectionContext>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        metrics::set_enabled(config.observability.metrics_enabled);
        let headers = HeaderNames::from_config(&config.headers)?;

        let mut applications = Vec::with_capacity(config.applications.len());
        let mut routes = Vec::with_capacity(config.applications.len());
        for app_config in &config.applications {
            let app = Application::build(app_config, &config.timeouts, &headers)?;
            routes.push(Route::new(
                app.id().clone(),
                app_config.host.as_deref(),
                app_config.path_prefix.clone(),
                Arc::new(app.client().clone()),
            ));
            applications.push(app);
        }

        let router = Arc::new(ApplicationRouter::new(routes));
        let handler = Arc::new(TimeoutHandler::new(
            RoutingHandler::new(router),
            config.timeouts.response(),
        ));

        let context = Arc::new(ConnectionContext {
            handler,
            headers,
            progress: Arc::new(MetricsProgressListener),
            head_limits: HeadLimits::from_config(&config.listener, config.timeouts.header_read()),
        });

        Ok(Self {
            config,
            applications,
            context,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Replace the listener that hears about every request's outcome.
    pub fn with_progress_listener(mut self, progress: Arc<dyn RequestProgressListener>) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.progress = progress;
        }
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    /// Serve until `shutdown` fires, then drain open connections.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let listener = Listener::from_tcp(listener, self.config.listener.max_connections)?;
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                applications = self.applications.len(),
                "Proxy server starting"
            );
        }

        let inventories = self
            .applications
            .iter()
            .map(|app| app.inventory().clone())
            .collect();
        let monitor = HealthMonitor::new(inventories, self.config.health_check.clone());
        let monitor_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let context = Arc::clone(&self.context);
                        let conn_shutdown = shutdown.resubscribe();
                        tokio::spawn(async move {
                            let _permit = permit;
                            serve_connection(stream, peer, guard.id(), context, conn_shutdown).await;
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Listener stopped");
                        break;
                    }
                },
                Some(updated) = config_updates.recv() => {
                    self.apply_config(&updated);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Proxy server received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        drop(listener);
        let open = self.tracker.active_count();
        if open > 0 {
            tracing::info!(connections = open, "Draining connections");
        }
        if !self.tracker.drain(DRAIN_TIMEOUT).await {
            tracing::warn!(
                connections = self.tracker.active_count(),
                "Connections still open after drain timeout"
            );
        }

        for app in &self.applications {
            app.inventory().close();
        }
        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Push reloaded origin lists into the running applications.
    fn apply_config(&self, updated: &ProxyConfig) {
        for app_config in &updated.applications {
            match self
                .applications
                .iter()
                .find(|app| app.id().as_str() == app_config.id)
            {
                Some(app) => match app.update_origins(app_config) {
                    Ok(()) => tracing::info!(
                        app = %app.id(),
                        origins = app_config.origins.len(),
                        "Origins reloaded"
                    ),
                    Err(e) => tracing::error!(app = %app.id(), error = %e, "Origin reload rejected"),
                },
                None => tracing::warn!(
                    app = %app_config.id,
                    "Application added to configuration; restart required to serve it"
                ),
            }
        }

        for app in &self.applications {
            if !updated
                .applications
                .iter()
                .any(|c| c.id == app.id().as_str())
            {
                tracing::warn!(
                    app = %app.id(),
                    "Application removed from configuration; still serving until restart"
                );
            }
        }
    }
}

/// Serve one client connection until it closes or shutdown is requested.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    context: Arc<ConnectionContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(connection_id = %id, peer = %peer, "Serving connection");

    let (driver, handle, mut close_rx) = PipelineDriver::new(
        Arc::clone(&context.handler),
        context.headers.clone(),
        Arc::clone(&context.progress),
    );
    let pipeline = tokio::spawn(driver.run());

    let stream = Arc::new(stream);
    let io = ClientIo::new(Arc::clone(&stream), handle.clone(), context.head_limits);

    let service_handle = handle.clone();
    let service = service_fn(move |request: Request<Incoming>| {
        let handle = service_handle.clone();
        async move { handle.dispatch(request.map(Body::new)).await }
    });

    // Head limits and the head read timeout are enforced by ClientIo. The
    // codec keeps one spare header slot so the overflow is reported there first.
    let limits = context.head_limits;
    let mut builder = http1::Builder::new();
    builder
        .keep_alive(true)
        .max_headers(limits.max_headers.saturating_add(1))
        .max_buf_size(CODEC_READ_BUFFER.max(limits.max_head_bytes.saturating_mul(2)));
    let mut conn = Box::pin(builder.serve_connection(TokioIo::new(io), service));

    let mut rejection = None;
    let result = tokio::select! {
        result = conn.as_mut() => result,
        closing = &mut close_rx => match closing {
            Ok(Some(response)) => {
                rejection = Some(response);
                Ok(())
            }
            _ => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        },
        _ = shutdown.recv() => {
            tracing::debug!(connection_id = %id, "Closing connection for shutdown");
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };
    drop(conn);

    if let Some(response) = rejection {
        let status = response.status();
        match Arc::into_inner(stream) {
            Some(stream) => match write_rejection(stream, response).await {
                Ok(()) => tracing::debug!(connection_id = %id, status = %status, "Rejection sent"),
                Err(e) => tracing::debug!(connection_id = %id, error = %e, "Rejection not delivered"),
            },
            None => tracing::warn!(connection_id = %id, "Socket still shared; rejection dropped"),
        }
    }

    if let Err(error) = result {
        tracing::debug!(connection_id = %id, error = %error, "Connection ended with error");
        if let Some(event) = connection_error_event(error) {
            handle.notify(event);
        }
    }
    handle.notify(Event::ChannelInactive);
    drop(handle);

    if let Err(e) = pipeline.await {
        tracing::error!(connection_id = %id, error = %e, "Pipeline task failed");
    }
    tracing::debug!(connection_id = %id, "Connection closed");
}

/// Write a response straight to the socket once the codec is gone, then
/// drain what the client is still sending so closing does not reset the
/// connection before the response is read.
async fn write_rejection(mut stream: TcpStream, response: Response<Body>) -> io::Result<()> {
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, MAX_REJECTION_BODY)
        .await
        .map_err(io::Error::other)?;

    let mut raw = Vec::with_capacity(256 + body.len());
    raw.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            parts.status.as_u16(),
            parts.status.canonical_reason().unwrap_or_default()
        )
        .as_bytes(),
    );
    for (name, value) in &parts.headers {
        raw.extend_from_slice(name.as_str().as_bytes());
        raw.extend_from_slice(b": ");
        raw.extend_from_slice(value.as_bytes());
        raw.extend_from_slice(b"\r\n");
    }
    raw.extend_from_slice(b"\r\n");
    raw.extend_from_slice(&body);

    stream.write_all(&raw).await?;
    stream.shutdown().await?;

    let mut sink = [0u8; 8192];
    let _ = tokio::time::timeout(REJECTION_LINGER, async {
        while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
    })
    .await;
    Ok(())
}

/// Translate a codec failure into the event the pipeline expects.
///
/// Malformed requests are answered 400 by the codec itself; head limits and
/// the head read timeout never reach it.
fn connection_error_event(error: hyper::Error) -> Option<PipelineEvent> {
    if error.is_parse_too_large() {
        return Some(Event::ChannelException(ProxyError::BadRequest {
            kind: BadRequestKind::HeadersTooLarge,
            source: Some(Box::new(error)),
        }));
    }
    if error.is_parse() || error.is_parse_status() {
        return Some(Event::ChannelException(ProxyError::BadRequest {
            kind: BadRequestKind::Malformed,
            source: Some(Box::new(error)),
        }));
    }
    if error.is_timeout() {
        return Some(Event::ChannelException(ProxyError::RequestTimeout));
    }
    if error.is_incomplete_message() || error.is_closed() || error.is_canceled() {
        return None;
    }
    Some(Event::ChannelException(ProxyError::Io(io::Error::other(error))))
}
