//! dispatch-proxy binary.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ net::Listener ──▶ http::server (hyper HTTP/1.1)
//!                                   │ one pipeline per connection
//!                                   ▼
//!                      resilience::TimeoutHandler
//!                                   ▼
//!                       routing::RoutingHandler ──▶ application
//!                                                     │
//!                        load_balancer vote ◀─────────┤
//!                                                     ▼
//!                       backend::BackendServiceClient ──▶ origins pool ──▶ Origin
//!
//!   Cross-cutting: config (load + watch), health (active checks),
//!                  observability (tracing + metrics), lifecycle (signals)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use dispatch_proxy::config::{load_config, ConfigWatcher};
use dispatch_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use dispatch_proxy::observability::init_logging;
use dispatch_proxy::ProxyServer;

#[derive(Debug, Parser)]
#[command(name = "dispatch-proxy", version, about = "HTTP/1.1 reverse proxy with pluggable load balancing")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "dispatch-proxy.toml")]
    config: PathBuf,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "dispatch-proxy starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        applications = config.applications.len(),
        response_timeout_ms = config.timeouts.response_ms,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let (watcher, config_updates) = ConfigWatcher::new(&cli.config);
    let _watcher = match watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable; live reload disabled");
            None
        }
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let server = ProxyServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
