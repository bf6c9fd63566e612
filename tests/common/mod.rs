//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use dispatch_proxy::config::{ApplicationConfig, OriginConfig, ProxyConfig, StrategyKind};
use dispatch_proxy::http::ServerError;
use dispatch_proxy::{ProxyServer, Shutdown};

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Read one request head (up to the blank line); `None` once the peer is done.
async fn read_head(socket: &mut TcpStream, pending: &mut Vec<u8>) -> Option<String> {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
            let head: Vec<u8> = pending.drain(..end + 4).collect();
            return Some(String::from_utf8_lossy(&head).into_owned());
        }
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => pending.extend_from_slice(&buf[..n]),
        }
    }
}

/// Value of `name` in a raw request head, case-insensitive.
pub fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// Start a keep-alive mock origin; `respond` maps each raw request head to (status, body).
pub async fn start_origin<F>(respond: F) -> SocketAddr
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                while let Some(head) = read_head(&mut socket, &mut pending).await {
                    let (status, body) = respond(&head);
                    let response = format!(
                        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n\r\n{}",
                        status,
                        reason(status),
                        body.len(),
                        body
                    );
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// Start a mock origin that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_origin(move |_| (200, body.to_string())).await
}

/// Accepts connections and reads requests but never answers.
pub async fn start_silent_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// Answers each request with `raw` bytes and closes the connection.
pub async fn start_raw_origin(raw: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut pending = Vec::new();
                if read_head(&mut socket, &mut pending).await.is_some() {
                    let _ = socket.write_all(raw).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn app_config(id: &str, path_prefix: &str, origins: &[(&str, SocketAddr)]) -> ApplicationConfig {
    let mut app = ApplicationConfig {
        id: id.into(),
        path_prefix: path_prefix.into(),
        origins: origins
            .iter()
            .map(|(origin, addr)| OriginConfig {
                id: (*origin).into(),
                host: addr.ip().to_string(),
                port: addr.port(),
            })
            .collect(),
        ..ApplicationConfig::default()
    };
    app.strategy.kind = StrategyKind::RoundRobin;
    app
}

/// Proxy configuration with health checks off and the given applications.
pub fn proxy_config(applications: Vec<ApplicationConfig>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.health_check.enabled = false;
    config.applications = applications;
    config
}

/// A proxy running on a local port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("proxy did not stop in time")
            .expect("proxy task panicked");
        assert!(result.is_ok(), "proxy failed: {:?}", result);
    }
}

pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    start_server(ProxyServer::new(config).unwrap()).await
}

pub async fn start_server(server: ProxyServer) -> RunningProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    let task = tokio::spawn(async move { server.run(listener, config_updates, server_shutdown).await });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    RunningProxy {
        addr,
        shutdown,
        updates,
        task,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
