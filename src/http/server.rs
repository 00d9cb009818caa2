//! Proxy server: accept loop and connection supervision.
//!
//! # Responsibilities
//! - Bind the proxy listener (fatal on failure, never retried)
//! - Spawn one pipeline task per accepted connection
//! - Stop accepting on shutdown, close live connections, wait for them

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::capture::TransactionObserver;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::pipeline::{Connection, ProxyContext};
use crate::lifecycle::{Shutdown, ShutdownListener};
use crate::net::backend::BackendConnector;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::rewrite::RewriteEngine;

/// The debugging proxy, bound and ready to run.
pub struct ProxyServer {
    listener: Listener,
    local_addr: SocketAddr,
    ctx: ProxyContext,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl ProxyServer {
    /// Bind the configured port. Bind failure is returned, not retried.
    pub async fn bind(
        config: &ProxyConfig,
        rewrite: Arc<RewriteEngine>,
        observer: Arc<dyn TransactionObserver>,
    ) -> Result<Self, ProxyError> {
        let listener = Listener::bind(&config.listener).await?;
        let local_addr = listener.local_addr()?;
        let connector = BackendConnector::new(config.timeouts.connect())?;

        Ok(Self {
            listener,
            local_addr,
            ctx: ProxyContext {
                rewrite,
                observer,
                connector,
            },
            tracker: ConnectionTracker::new(),
            shutdown_grace: config.timeouts.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connection counter, shared with the running server.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires, then close every live
    /// connection and wait up to the grace period for them to finish.
    pub async fn run(self, mut shutdown: ShutdownListener) {
        tracing::info!(address = %self.local_addr, "Proxy server starting");
        let closing = Shutdown::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let id = guard.id();
                        let conn = Connection::new(id, peer, self.ctx.clone());
                        let mut close = closing.subscribe();
                        let span = tracing::info_span!("connection", connection_id = %id, peer = %peer);

                        tokio::spawn(
                            async move {
                                let _permit = permit;
                                let _guard = guard;
                                tokio::select! {
                                    _ = conn.serve(stream) => {}
                                    _ = close.recv() => tracing::debug!("Connection closed by shutdown"),
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Shutting down proxy server"
        );
        drop(self.listener);
        closing.trigger();

        if !self.tracker.wait_idle(self.shutdown_grace).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }
        tracing::info!("Proxy server stopped");
    }

    /// Run on a background task, returning a handle that stops it.
    pub fn spawn(self) -> RunningProxy {
        let shutdown = Shutdown::new();
        let addr = self.local_addr;
        let tracker = self.tracker();
        let task = tokio::spawn(self.run(shutdown.subscribe()));
        RunningProxy {
            addr,
            tracker,
            shutdown,
            task,
        }
    }
}

/// Handle to a proxy started with [`ProxyServer::spawn`].
pub struct RunningProxy {
    addr: SocketAddr,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl RunningProxy {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Stop accepting, close live connections and wait for the server to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Proxy server task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NoopObserver;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.listener.port = 0;
        config.timeouts.shutdown_grace_secs = 1;
        config
    }

    async fn server() -> ProxyServer {
        ProxyServer::bind(&config(), Arc::new(RewriteEngine::with_defaults()), Arc::new(NoopObserver))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn bind_failure_is_surfaced() {
        let first = server().await;
        let mut config = config();
        config.listener.port = first.local_addr().port();

        let err = ProxyServer::bind(&config, Arc::new(RewriteEngine::with_defaults()), Arc::new(NoopObserver))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::Listener(ListenerError::Bind { .. })));
    }

    #[tokio::test]
    async fn stop_closes_idle_connections() {
        let running = server().await.spawn();
        let mut client = TcpStream::connect(running.local_addr()).await.unwrap();

        for _ in 0..50 {
            if running.active_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(running.active_connections(), 1);

        running.stop().await;

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
