//! Message codec helpers.
//!
//! # Responsibilities
//! - Render header maps as ordered `Name: value` text for capture
//! - Decode captured bodies as text, or substitute a size placeholder
//! - Build synthetic responses (CONNECT acknowledgement, gateway errors)
//! - Adapt a proxied request for the origin (origin-form target, Host header)
//!
//! # Design Decisions
//! - Wire parsing and serialization are hyper's job; this module only
//!   translates between hyper types and what the capture layer records
//! - Header order is the order hyper preserved from the wire
//! - A body that is not valid UTF-8 is never an error, only a placeholder

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::{PathAndQuery, Uri};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// Body recorded for a response with no content.
pub const EMPTY_RESPONSE: &str = "[EMPTY RESPONSE]";

/// Body recorded for a CONNECT tunnel; tunnel traffic is never visible.
pub const TUNNEL_BODY: &str = "[ENCRYPTED CONTENT - TUNNEL]";

/// Non-standard header some clients send instead of `Connection`.
const PROXY_CONNECTION: &str = "proxy-connection";

/// A single header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `Name: value` line. Returns `None` when there is no colon.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (name, value) = line.split_once(':')?;
        Some(Self::new(name.trim(), value.trim()))
    }
}

/// Collect headers in wire order. Values that are not visible ASCII are
/// decoded lossily rather than dropped.
pub fn header_list(headers: &HeaderMap) -> Vec<Header> {
    headers
        .iter()
        .map(|(name, value)| {
            Header::new(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Serialize headers as `Name: value` lines, one per header.
pub fn serialize_headers(headers: &HeaderMap) -> String {
    header_list(headers)
        .iter()
        .map(|h| format!("{}: {}\n", h.name, h.value))
        .collect()
}

/// Placeholder for a request body that is not text.
pub fn binary_placeholder(len: usize) -> String {
    format!("[BINARY DATA - {} bytes]", len)
}

/// Placeholder for a response body that is not text (compressed, binary or encrypted).
pub fn encrypted_placeholder(len: usize) -> String {
    format!("[ENCRYPTED CONTENT - {} bytes]", len)
}

/// Decode a captured request body. An empty body stays empty.
pub fn decode_request_body(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => binary_placeholder(body.len()),
    }
}

/// Decode a captured response body.
///
/// Bodies with a non-identity `Content-Encoding` are recorded as a placeholder
/// even when the bytes happen to be valid UTF-8.
pub fn decode_response_body(headers: &HeaderMap, body: &[u8]) -> String {
    if body.is_empty() {
        return EMPTY_RESPONSE.to_string();
    }
    let encoded = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.trim().eq_ignore_ascii_case("identity"))
        .unwrap_or(false);
    if encoded {
        return encrypted_placeholder(body.len());
    }
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => encrypted_placeholder(body.len()),
    }
}

/// A plain-text response generated by the proxy itself.
///
/// With `close` set, the client connection is closed after the response is written.
pub fn text_response(status: StatusCode, body: impl Into<String>, close: bool) -> Response<Full<Bytes>> {
    let body = Bytes::from(body.into());
    let mut response = Response::new(Full::new(body.clone()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    if close {
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

/// The `200` that acknowledges a CONNECT before the tunnel takes over.
pub fn connect_established() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::OK;
    response
}

/// Rewrite an outbound request for the origin server.
///
/// The absolute-form target a client sends to a proxy becomes origin-form,
/// the `Host` header is filled in when the client left it out, and the
/// proxy-only `Proxy-Connection` header is dropped. Everything else is
/// forwarded as received.
pub fn prepare_outbound<B>(request: &mut Request<B>, authority: &str) {
    let origin_form = request
        .uri()
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    *request.uri_mut() = Uri::from(origin_form);

    let headers = request.headers_mut();
    headers.remove(HeaderName::from_static(PROXY_CONNECTION));
    if !headers.contains_key(header::HOST) {
        if let Ok(value) = HeaderValue::from_str(authority) {
            headers.insert(header::HOST, value);
        }
    }
}

/// Whether a response to `method` with `status` is defined to have no body.
pub fn is_bodiless(method: &Method, status: StatusCode) -> bool {
    method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Re-frame a fully buffered response body: the length is now known, so
/// chunked transfer coding is replaced by an exact `Content-Length`.
pub fn reframe_buffered(headers: &mut HeaderMap, body_len: usize) {
    headers.remove(header::TRANSFER_ENCODING);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));
}
