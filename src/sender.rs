//! Request Builder: one-off outbound HTTP calls.
//!
//! Not on the proxy data path. Used by the `send` subcommand to replay or
//! hand-craft a request and show what came back.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};

use crate::error::{ProxyError, Result};
use crate::http::codec::{header_list, Header};

/// A request as entered by the user.
#[derive(Debug, Clone, Default)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<Header>,
    pub body: String,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// What the server sent back.
#[derive(Debug, Clone)]
pub struct SentResponse {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: String,
    pub content_type: Option<String>,
    pub duration: Duration,
}

impl SentResponse {
    /// `Status`, `Headers` and `Body` sections, as shown in the Request Builder pane.
    pub fn render(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|h| format!("{}: {}\n", h.name, h.value))
            .collect();
        format!(
            "Status: {}\n\nHeaders:\n{}\nBody:\n{}",
            self.status, headers, self.body
        )
    }
}

/// Unknown methods fall back to GET.
fn map_method(method: &str) -> Method {
    match method.trim().to_ascii_uppercase().as_str() {
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "DELETE" => Method::DELETE,
        "PATCH" => Method::PATCH,
        "HEAD" => Method::HEAD,
        "OPTIONS" => Method::OPTIONS,
        _ => Method::GET,
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

#[derive(Debug, Clone)]
pub struct RequestSender {
    client: Client,
}

impl RequestSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self { client })
    }

    pub async fn send(&self, request: &OutboundRequest) -> Result<SentResponse> {
        let url = url::Url::parse(request.url.trim())
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", request.url, e)))?;
        let method = map_method(&request.method);

        let mut builder = self.client.request(method.clone(), url.clone());
        for header in &request.headers {
            let name = header.name.trim();
            if name.is_empty() {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&header.value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => tracing::warn!(header = %name, "Skipping malformed header"),
            }
        }
        if carries_body(&method) && !request.body.trim().is_empty() {
            builder = builder.body(request.body.clone());
        }

        tracing::info!(method = %method, url = %url, "Sending request");
        let start = Instant::now();
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = header_list(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        let duration = start.elapsed();

        tracing::info!(status, duration_ms = duration.as_millis() as u64, "Response received");
        Ok(SentResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            content_type,
            duration,
        })
    }
}
