use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::capture::Transaction;
use crate::rewrite::{RewriteRule, RuleError};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub proxy_address: String,
    pub active_connections: u64,
    pub rules: usize,
    pub captured_transactions: usize,
}

#[derive(Serialize)]
pub struct RuleView {
    pub index: usize,
    #[serde(flatten)]
    pub rule: RewriteRule,
}

#[derive(Deserialize)]
pub struct TransactionQuery {
    #[serde(default)]
    pub filter: String,
}

/// Rule store failure mapped onto an HTTP status.
#[derive(Debug)]
pub struct AdminError(RuleError);

impl From<RuleError> for AdminError {
    fn from(e: RuleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            RuleError::IndexOutOfRange { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        proxy_address: state.proxy_addr.to_string(),
        active_connections: state.tracker.active_count(),
        rules: state.rewrite.len(),
        captured_transactions: state.history.len(),
    })
}

pub async fn list_rules(State(state): State<AdminState>) -> Json<Vec<RuleView>> {
    let rules = state.rewrite.rules();
    Json(
        rules
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, rule)| RuleView { index, rule })
            .collect(),
    )
}

pub async fn add_rule(
    State(state): State<AdminState>,
    Json(rule): Json<RewriteRule>,
) -> Result<(StatusCode, Json<RewriteRule>), AdminError> {
    state.rewrite.add_rule(rule.clone())?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
    State(state): State<AdminState>,
    Path(index): Path<usize>,
    Json(rule): Json<RewriteRule>,
) -> Result<Json<RewriteRule>, AdminError> {
    state.rewrite.update_rule(index, rule.clone())?;
    Ok(Json(rule))
}

pub async fn delete_rule(
    State(state): State<AdminState>,
    Path(index): Path<usize>,
) -> Result<Json<RewriteRule>, AdminError> {
    let removed = state.rewrite.remove_at(index)?;
    tracing::info!(index, "Rewrite rule removed");
    Ok(Json(removed))
}

pub async fn enable_all(State(state): State<AdminState>) -> StatusCode {
    state.rewrite.set_all_enabled(true);
    StatusCode::NO_CONTENT
}

pub async fn disable_all(State(state): State<AdminState>) -> StatusCode {
    state.rewrite.set_all_enabled(false);
    StatusCode::NO_CONTENT
}

pub async fn list_transactions(
    State(state): State<AdminState>,
    Query(query): Query<TransactionQuery>,
) -> Json<Vec<Transaction>> {
    Json(state.history.filter(&query.filter))
}

pub async fn clear_transactions(State(state): State<AdminState>) -> StatusCode {
    state.history.clear();
    StatusCode::NO_CONTENT
}
