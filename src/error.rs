//! Error types for the proxy.
//!
//! Every failure on the data path ends in one of two places: a closed
//! connection plus an annotated transaction, or (at startup) an error
//! returned to the caller. Nothing here is retried.

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::net::listener::ListenerError;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Listening socket could not be bound or accepted on.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plain I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP protocol failure on either side of the proxy.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request does not name a reachable host.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Outbound TCP connect failed.
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Outbound connect did not finish before the deadline.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// Request Builder call failed.
    #[error("request failed: {0}")]
    Sender(#[from] reqwest::Error),
}

impl ProxyError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Listener(_) => "listener",
            ProxyError::Config(_) => "config",
            ProxyError::Io(_) => "io",
            ProxyError::Tls(_) => "tls",
            ProxyError::Http(_) => "protocol",
            ProxyError::InvalidTarget(_) => "invalid_target",
            ProxyError::Connect { .. } => "connect",
            ProxyError::ConnectTimeout(_) => "timeout",
            ProxyError::Sender(_) => "sender",
        }
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
