//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (connections, exchanges, rewrites, errors, tunnels)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_transactions_total` (counter): completed exchanges by method, status
//! - `proxy_request_duration_seconds` (histogram): exchange latency
//! - `proxy_status_rewrites_total` (counter): responses whose status was rewritten
//! - `proxy_backend_errors_total` (counter): backend failures by kind
//! - `proxy_tunnel_bytes_total` (counter): tunnel bytes by direction
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed, so tests never need an exporter

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::tunnel::TunnelStats;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(active: u64) {
    metrics::counter!("proxy_connections_total").increment(1);
    metrics::gauge!("proxy_active_connections").set(active as f64);
}

pub fn record_connection_closed(active: u64) {
    metrics::gauge!("proxy_active_connections").set(active as f64);
}

/// Record one finished exchange (including proxy-generated error responses).
pub fn record_transaction(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_transactions_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_status_rewrite() {
    metrics::counter!("proxy_status_rewrites_total").increment(1);
}

/// `kind` is a short label such as `connect`, `timeout`, `tls` or `protocol`.
pub fn record_backend_error(kind: &'static str) {
    metrics::counter!("proxy_backend_errors_total", "kind" => kind).increment(1);
}

pub fn record_tunnel_bytes(stats: &TunnelStats) {
    metrics::counter!("proxy_tunnel_bytes_total", "direction" => "client_to_backend")
        .increment(stats.client_to_backend);
    metrics::counter!("proxy_tunnel_bytes_total", "direction" => "backend_to_client")
        .increment(stats.backend_to_client);
}
