//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection
//!     → server.rs (accept loop, per-connection task, shutdown)
//!     → pipeline.rs (hyper HTTP/1.1 codec, state machine)
//!         → plain HTTP: forward, rewrite status, record
//!         → CONNECT: acknowledge, upgrade, relay raw bytes
//!     → codec.rs (header/body capture, synthetic responses)
//! ```

pub mod codec;
pub mod pipeline;
pub mod server;

pub use pipeline::{Connection, ProxyContext};
pub use server::{ProxyServer, RunningProxy};
