//! Backend connector.
//!
//! # Responsibilities
//! - Resolve the origin (scheme, host, port) a proxied request is aimed at
//! - Open a fresh outbound connection per request, TLS-wrapped for HTTPS
//! - Send the request over an HTTP/1.1 client connection
//!
//! # Design Decisions
//! - No pooling and no retry: one exchange, one backend connection
//! - The backend connection task is owned by a [`BackendSession`] and aborted
//!   when the session drops, so a client going away takes its backend with it

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use hyper::body::{Body, Incoming};
use hyper::http::uri::{Authority, Uri};
use hyper::{header, Request, Response};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use crate::error::ProxyError;
use crate::http::codec;
use crate::net::tls;

/// Origin protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Where a request is going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Resolve the origin of a forwarded (non-CONNECT) request.
    ///
    /// An absolute `http://` or `https://` target wins; otherwise the `Host`
    /// header is used with plain HTTP on port 80 unless it names a port.
    pub fn from_request<B>(request: &Request<B>) -> Result<Self, ProxyError> {
        let uri = request.uri();
        if let Some(scheme) = uri.scheme_str() {
            let scheme = match scheme.to_ascii_lowercase().as_str() {
                "http" => Scheme::Http,
                "https" => Scheme::Https,
                other => {
                    return Err(ProxyError::InvalidTarget(format!(
                        "unsupported scheme '{other}'"
                    )))
                }
            };
            let authority = uri
                .authority()
                .ok_or_else(|| ProxyError::InvalidTarget(format!("no host in '{uri}'")))?;
            return Self::from_authority(scheme, authority);
        }

        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProxyError::InvalidTarget("request has no host".to_string()))?;
        let authority = Authority::from_str(host)
            .map_err(|e| ProxyError::InvalidTarget(format!("bad Host header '{host}': {e}")))?;
        Self::from_authority(Scheme::Http, &authority)
    }

    /// Resolve the `host:port` of a CONNECT request. The port defaults to 443.
    pub fn for_connect(uri: &Uri) -> Result<Self, ProxyError> {
        let authority = uri
            .authority()
            .ok_or_else(|| ProxyError::InvalidTarget(format!("bad CONNECT target '{uri}'")))?;
        Self::from_authority(Scheme::Https, authority)
    }

    fn from_authority(scheme: Scheme, authority: &Authority) -> Result<Self, ProxyError> {
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']');
        if host.is_empty() {
            return Err(ProxyError::InvalidTarget(format!("no host in '{authority}'")));
        }
        Ok(Self {
            scheme,
            host: host.to_string(),
            port: authority.port_u16().unwrap_or(scheme.default_port()),
        })
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for a `Host` header: the port is left out when it is the default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            if self.host.contains(':') {
                format!("[{}]", self.host)
            } else {
                self.host.clone()
            }
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

/// Full URL of a request as the client meant it, for display and rule matching.
///
/// Origin-form targets are completed from the `Host` header.
pub fn request_url<B>(request: &Request<B>) -> String {
    let uri = request.uri();
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    match request.headers().get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => format!("http://{}{}", host.trim(), path),
        None => uri.to_string(),
    }
}

/// Byte stream to an origin: plain TCP or TLS over TCP.
pub trait BackendIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> BackendIo for T {}

/// Keeps a backend HTTP connection alive. Dropping it closes the connection.
#[derive(Debug)]
pub struct BackendSession {
    task: JoinHandle<()>,
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Opens outbound connections to origin servers.
#[derive(Clone)]
pub struct BackendConnector {
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl BackendConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self, ProxyError> {
        Ok(Self {
            tls: TlsConnector::from(tls::insecure_client_config()?),
            connect_timeout,
        })
    }

    /// Plain TCP connection to `target`, bounded by the connect timeout.
    pub async fn connect_tcp(&self, target: &Target) -> Result<TcpStream, ProxyError> {
        let connect = TcpStream::connect((target.host.as_str(), target.port));
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(source)) => Err(ProxyError::Connect {
                target: target.authority(),
                source,
            }),
            Err(_) => Err(ProxyError::ConnectTimeout(target.authority())),
        }
    }

    /// Connection to `target`, with TLS when the scheme is HTTPS.
    pub async fn connect(&self, target: &Target) -> Result<Box<dyn BackendIo>, ProxyError> {
        let tcp = self.connect_tcp(target).await?;
        match target.scheme {
            Scheme::Http => Ok(Box::new(tcp)),
            Scheme::Https => {
                let server_name = ServerName::try_from(target.host.clone())
                    .map_err(|e| ProxyError::Tls(format!("{}: {e}", target.host)))?;
                let handshake = self.tls.connect(server_name, tcp);
                let stream = tokio::time::timeout(self.connect_timeout, handshake)
                    .await
                    .map_err(|_| ProxyError::ConnectTimeout(target.authority()))?
                    .map_err(|e| ProxyError::Tls(format!("{}: {e}", target.authority())))?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Send `request` to `target` over a new connection.
    ///
    /// The response body streams from the returned session's connection; keep
    /// the session alive until the body has been read.
    pub async fn forward<B>(
        &self,
        target: &Target,
        mut request: Request<B>,
    ) -> Result<(Response<Incoming>, BackendSession), ProxyError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        codec::prepare_outbound(&mut request, &target.host_header());

        let io = self.connect(target).await?;
        let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
            .preserve_header_case(true)
            .handshake(TokioIo::new(io))
            .await?;

        let authority = target.authority();
        let session = BackendSession {
            task: tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(backend = %authority, error = %e, "Backend connection ended with error");
                }
            }),
        };

        let response = sender.send_request(request).await?;
        Ok((response, session))
    }
}
