//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use debug_proxy::capture::{ChannelObserver, FanoutObserver, TrafficHistory, Transaction};
use debug_proxy::config::ProxyConfig;
use debug_proxy::http::{ProxyServer, RunningProxy};
use debug_proxy::rewrite::{RewriteEngine, RewriteRule};

/// A request as seen by a mock origin.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    /// `GET /path HTTP/1.1`
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

/// Read one request head and its `Content-Length` body.
pub async fn read_request(socket: &mut TcpStream) -> Option<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut request = ReceivedRequest {
        head,
        body: buf[head_end..].to_vec(),
    };
    let length: usize = request
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while request.body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        request.body.extend_from_slice(&chunk[..n]);
    }
    Some(request)
}

fn response_bytes(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
}

/// Start a mock origin that answers every request with a fixed response.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (status, body.to_string()) }).await
}

/// Start a mock origin whose response is computed from the received request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(ReceivedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let _ = socket.write_all(response_bytes(status, &body).as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a mock origin that forwards every received request to the returned channel.
pub async fn start_recording_backend(
    status: u16,
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<ReceivedRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = start_programmable_backend(move |request| {
        let _ = tx.send(request);
        async move { (status, body.to_string()) }
    })
    .await;
    (addr, rx)
}

/// Start a raw TCP server that writes back everything it reads.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A proxy on an ephemeral port with everything it emits captured.
pub struct TestProxy {
    pub running: RunningProxy,
    pub rewrite: Arc<RewriteEngine>,
    pub history: Arc<TrafficHistory>,
    pub emissions: mpsc::UnboundedReceiver<Transaction>,
}

impl TestProxy {
    pub async fn start(rules: Vec<RewriteRule>) -> Self {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.listener.port = 0;
        config.timeouts.connect_secs = 2;
        config.timeouts.shutdown_grace_secs = 1;

        let rewrite = Arc::new(RewriteEngine::from_config(&rules).unwrap());
        let history = Arc::new(TrafficHistory::new(100));
        let (channel, emissions) = ChannelObserver::new();
        let observer = FanoutObserver::new()
            .with(history.clone())
            .with(Arc::new(channel));

        let running = ProxyServer::bind(&config, rewrite.clone(), Arc::new(observer))
            .await
            .unwrap()
            .spawn();

        Self {
            running,
            rewrite,
            history,
            emissions,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.running.local_addr()
    }

    /// A reqwest client that sends plain HTTP through this proxy.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(format!("http://{}", self.addr())).unwrap())
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    /// Everything emitted so far.
    pub fn drain(&mut self) -> Vec<Transaction> {
        std::iter::from_fn(|| self.emissions.try_recv().ok()).collect()
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
