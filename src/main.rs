//! Debug Proxy
//!
//! An interactive HTTP/HTTPS debugging proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                     DEBUG PROXY                       │
//!                       │                                                       │
//!     Client Request    │  ┌─────────┐    ┌──────────┐    ┌──────────────┐      │
//!     ──────────────────┼─▶│   net   │───▶│   http   │───▶│   backend    │──────┼──▶ Origin
//!                       │  │listener │    │ pipeline │    │ HTTP / TLS   │      │
//!                       │  └─────────┘    └────┬─────┘    └──────────────┘      │
//!                       │                      │  CONNECT                       │
//!                       │                      ▼                                │
//!                       │                 ┌──────────┐                          │
//!                       │                 │  tunnel  │──────────────────────────┼──▶ Origin
//!                       │                 └──────────┘                          │
//!     Client Response   │  ┌──────────┐   ┌──────────┐                          │
//!     ◀─────────────────┼──│ rewrite  │◀──│ capture  │                          │
//!                       │  │ engine   │   │ recorder │                          │
//!                       │  └──────────┘   └──────────┘                          │
//!                       │                                                       │
//!                       │  config (+ hot reload) · observability · admin API    │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use debug_proxy::admin::{serve_admin, AdminState};
use debug_proxy::capture::{FanoutObserver, LoggingObserver, TrafficHistory, TransactionObserver};
use debug_proxy::config::validation::validate_config;
use debug_proxy::config::{load_config, ConfigError, ConfigWatcher, ProxyConfig};
use debug_proxy::http::codec::Header;
use debug_proxy::http::ProxyServer;
use debug_proxy::lifecycle::{wait_for_signal, Shutdown};
use debug_proxy::observability::{logging::init_logging, metrics::init_metrics};
use debug_proxy::rewrite::RewriteEngine;
use debug_proxy::sender::{OutboundRequest, RequestSender};

#[derive(Parser)]
#[command(name = "debug-proxy")]
#[command(version, about = "Interactive HTTP/HTTPS debugging proxy", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (overrides the file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listening address (overrides the file)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Log level (overrides the file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy (default)
    Run,
    /// Send a single request and print the response
    Send {
        method: String,
        url: String,
        /// Header as `Name: value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Request body (POST, PUT and PATCH only)
        #[arg(short, long, default_value = "")]
        data: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability)?;

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.runtime.worker_threads > 0 {
        builder.worker_threads(config.runtime.worker_threads);
    }
    let runtime = builder.build()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => runtime.block_on(run(config, cli.config)),
        Commands::Send {
            method,
            url,
            headers,
            data,
        } => runtime.block_on(send(&config, method, url, headers, data)),
    }
}

async fn run(
    config: ProxyConfig,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "debug-proxy starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let rewrite = Arc::new(RewriteEngine::from_config(&config.rewrite_rules)?);
    let history = Arc::new(TrafficHistory::new(config.capture.history_limit));
    let observer: Arc<dyn TransactionObserver> = Arc::new(
        FanoutObserver::new()
            .with(history.clone())
            .with(Arc::new(LoggingObserver)),
    );

    let server = ProxyServer::bind(&config, rewrite.clone(), observer).await?;
    let proxy_addr = server.local_addr();
    let tracker = server.tracker();
    tracing::info!(
        address = %proxy_addr,
        rules = rewrite.len(),
        max_connections = config.listener.max_connections,
        "Proxy listening"
    );

    let shutdown = Shutdown::new();
    let proxy_task = tokio::spawn(server.run(shutdown.subscribe()));

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            rewrite: rewrite.clone(),
            history: history.clone(),
            tracker,
            proxy_addr,
            api_key: config.admin.api_key.clone(),
        };
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    // The watcher must stay alive for updates to keep arriving.
    let (_watcher, mut updates) = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            match watcher.run() {
                Ok(w) => (Some(w), Some(updates)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    loop {
        tokio::select! {
            _ = wait_for_signal() => break,
            Some(new_config) = async {
                match updates.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match rewrite.replace_rules(new_config.rewrite_rules) {
                    Ok(()) => tracing::info!(rules = rewrite.len(), "Rewrite rules reloaded"),
                    Err(e) => tracing::error!(error = %e, "Rejected reloaded rules, keeping current set"),
                }
            }
        }
    }

    shutdown.trigger();
    let grace = config.timeouts.shutdown_grace() + Duration::from_secs(1);
    if tokio::time::timeout(grace, proxy_task).await.is_err() {
        tracing::warn!("Proxy server did not stop within the grace period");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn send(
    config: &ProxyConfig,
    method: String,
    url: String,
    headers: Vec<String>,
    body: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = OutboundRequest::new(method, url).body(body);
    for line in &headers {
        match Header::parse_line(line) {
            Some(header) => request.headers.push(header),
            None => tracing::warn!(header = %line, "Ignoring header without ':'"),
        }
    }

    let sender = RequestSender::new(config.timeouts.connect())?;
    let response = sender.send(&request).await?;
    println!("{}", response.render());
    tracing::debug!(duration_ms = response.duration.as_millis() as u64, "Request finished");
    Ok(())
}
