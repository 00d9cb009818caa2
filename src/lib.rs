//! HTTP/HTTPS debugging proxy.
//!
//! Sits between a client and the servers it talks to. Plain HTTP exchanges
//! are forwarded, recorded as [`Transaction`]s and optionally have their
//! response status rewritten on the way back. `CONNECT` requests open a
//! byte-for-byte tunnel that is recorded once and never inspected.
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──▶ http::pipeline
//!                                                      │
//!                        ┌─────────────────────────────┼──────────────────┐
//!                        ▼                             ▼                  ▼
//!                 net::backend                    rewrite engine     capture::recorder
//!                 (HTTP / HTTPS)                  (status rules)     (observer emissions)
//!                        │
//!                 net::tunnel (CONNECT)
//! ```
//!
//! Configuration, logging, metrics, the admin API and the request sender sit
//! around that core.

pub mod admin;
pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod rewrite;
pub mod sender;

pub use capture::{Transaction, TransactionObserver};
pub use config::schema::ProxyConfig;
pub use error::{ProxyError, Result};
pub use http::{ProxyServer, RunningProxy};
pub use lifecycle::Shutdown;
pub use rewrite::{RewriteEngine, RewriteRule};
