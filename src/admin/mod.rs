//! Admin API for inspecting and steering a running proxy.
//!
//! Every route sits behind bearer-token auth. Rule mutations go through the
//! same [`RewriteEngine`] the connections read, so changes apply to the next
//! response without a restart.

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::capture::TrafficHistory;
use crate::lifecycle::ShutdownListener;
use crate::net::connection::ConnectionTracker;
use crate::rewrite::RewriteEngine;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub rewrite: Arc<RewriteEngine>,
    pub history: Arc<TrafficHistory>,
    pub tracker: ConnectionTracker,
    pub proxy_addr: SocketAddr,
    pub api_key: String,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/rules", get(list_rules).post(add_rule))
        .route("/admin/rules/{index}", put(update_rule).delete(delete_rule))
        .route("/admin/rules/enable-all", post(enable_all))
        .route("/admin/rules/disable-all", post(disable_all))
        .route(
            "/admin/transactions",
            get(list_transactions).delete(clear_transactions),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `listener` until `shutdown` fires.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: ShutdownListener,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
}
