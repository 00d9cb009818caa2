//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept, connection limits)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → Hand off to HTTP layer
//!
//! Outbound side:
//!     → backend.rs (target resolution, TCP connect, optional TLS, forward)
//!     → tls.rs (client config that accepts any certificate)
//!     → tunnel.rs (raw byte relay for CONNECT)
//!
//! Connection States:
//!     AwaitingRequest ⇄ HttpForwarding
//!     AwaitingRequest → TunnelEstablishing → TunnelActive
//!     any → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - One fresh backend connection per request, never pooled or retried

pub mod backend;
pub mod connection;
pub mod listener;
pub mod tls;
pub mod tunnel;
