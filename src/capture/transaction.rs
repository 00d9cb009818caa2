//! Captured request/response record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::http::codec::TUNNEL_BODY;

/// Unique identifier for a transaction. Assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new random transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One captured HTTP exchange (or CONNECT).
///
/// Fields are private so that `id` cannot change after creation and so that
/// `modified` always agrees with the two status fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    id: TransactionId,
    timestamp: DateTime<Utc>,
    method: String,
    url: String,
    request_headers: String,
    request_body: String,
    response_headers: String,
    response_body: String,
    status_code: u16,
    original_status_code: u16,
    modified: bool,
    intercepted: bool,
    duration_ms: Option<u64>,
}

impl Transaction {
    /// A pending transaction: request line and headers known, status 0.
    pub fn new(method: impl Into<String>, url: impl Into<String>, request_headers: impl Into<String>) -> Self {
        Self {
            id: TransactionId::new(),
            timestamp: Utc::now(),
            method: method.into(),
            url: url.into(),
            request_headers: request_headers.into(),
            request_body: String::new(),
            response_headers: String::new(),
            response_body: String::new(),
            status_code: 0,
            original_status_code: 0,
            modified: false,
            intercepted: false,
            duration_ms: None,
        }
    }

    /// The synthetic record for a CONNECT: answered 200, contents opaque.
    pub fn tunnel(authority: impl Into<String>, request_headers: impl Into<String>) -> Self {
        let mut tx = Self::new("CONNECT", authority, request_headers);
        tx.intercepted = true;
        tx.response_body = TUNNEL_BODY.to_string();
        tx.set_status(200, 200);
        tx
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn request_headers(&self) -> &str {
        &self.request_headers
    }

    pub fn request_body(&self) -> &str {
        &self.request_body
    }

    pub fn response_headers(&self) -> &str {
        &self.response_headers
    }

    pub fn response_body(&self) -> &str {
        &self.response_body
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn original_status_code(&self) -> u16 {
        self.original_status_code
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// True for CONNECT tunnels, whose traffic is never decrypted.
    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }

    /// No response (or error) recorded yet.
    pub fn is_pending(&self) -> bool {
        self.status_code == 0
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub(crate) fn set_request_body(&mut self, body: String) {
        self.request_body = body;
    }

    /// Record the final and the pre-rewrite status together.
    pub(crate) fn set_status(&mut self, status_code: u16, original_status_code: u16) {
        self.status_code = status_code;
        self.original_status_code = original_status_code;
        self.modified = status_code != original_status_code;
    }

    pub(crate) fn set_response(&mut self, headers: String, body: String) {
        self.response_headers = headers;
        self.response_body = body;
    }

    pub(crate) fn set_duration_ms(&mut self, millis: u64) {
        self.duration_ms = Some(millis);
    }

    /// Text shown for the request side of the exchange.
    pub fn render_request(&self) -> String {
        format!(
            "{} {}\n\nHeaders:\n{}\n\nBody:\n{}",
            self.method, self.url, self.request_headers, self.request_body
        )
    }

    /// Text shown for the response side, including the rewrite if one happened.
    pub fn render_response(&self) -> String {
        let status = if self.modified {
            format!(
                "Status: {} → {} (MODIFIED)",
                self.original_status_code, self.status_code
            )
        } else {
            format!("Status: {}", self.status_code)
        };
        format!(
            "{}\n\nHeaders:\n{}\n\nBody:\n{}",
            status, self.response_headers, self.response_body
        )
    }
}
