//! Per-connection proxy pipeline.
//!
//! # Responsibilities
//! - Drive hyper's HTTP/1.1 server codec for one client connection
//! - Forward plain HTTP exchanges and record them as transactions
//! - Apply status rewrites before the response reaches the client
//! - Answer `CONNECT` and hand the connection over to the tunnel relay
//!
//! # Data Flow
//! ```text
//! Client request head
//!     → GET/POST/...: Recorder::start → Target → BackendConnector::forward
//!         → buffer response → RewriteEngine → Recorder::complete → client
//!     → CONNECT: tunnel Transaction emitted → 200 → upgrade
//!         → plain TCP to host:port → tunnel::relay until either side closes
//! ```
//!
//! # Design Decisions
//! - The HTTP codec and the relay are two distinct phases of one task: once
//!   hyper hands over the upgraded stream there is no path back to HTTP
//! - Responses are buffered whole so the status can be rewritten and the body
//!   captured before anything is written to the client
//! - Every proxy-generated error response closes the client connection
//! - A request is dispatched only if the connection state machine accepts it;
//!   `ResponseSent` marks the response handed to hyper, which writes it
//!   before reading the next request head
//! - A client that disconnects mid-exchange drops the service future; the
//!   exchange guard then finalizes the transaction with a 500

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::capture::{Recorder, RecordingBody, Transaction, TransactionObserver};
use crate::error::ProxyError;
use crate::http::codec;
use crate::net::backend::{self, BackendConnector, Target};
use crate::net::connection::{ConnectionEvent, ConnectionId, ConnectionState, TransitionError};
use crate::net::tunnel;
use crate::observability::metrics;
use crate::rewrite::RewriteEngine;

/// Shared collaborators handed to every connection.
#[derive(Clone)]
pub struct ProxyContext {
    pub rewrite: Arc<RewriteEngine>,
    pub observer: Arc<dyn TransactionObserver>,
    pub connector: BackendConnector,
}

struct PendingTunnel {
    upgrade: OnUpgrade,
    target: Target,
}

/// One accepted client connection.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: Mutex<ConnectionState>,
    pending_tunnel: Mutex<Option<PendingTunnel>>,
    ctx: ProxyContext,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, ctx: ProxyContext) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer,
            state: Mutex::new(ConnectionState::AwaitingRequest),
            pending_tunnel: Mutex::new(None),
            ctx,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, event: ConnectionEvent) -> Result<ConnectionState, TransitionError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = state.on(event)?;
        *state = next;
        Ok(next)
    }

    fn note(&self, event: ConnectionEvent) {
        if let Err(e) = self.advance(event) {
            tracing::debug!(connection_id = %self.id, error = %e, "Ignoring state event");
        }
    }

    /// Serve the connection until the client goes away or the tunnel ends.
    pub async fn serve<I>(self: Arc<Self>, io: I)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let service = {
            let conn = Arc::clone(&self);
            service_fn(move |request| {
                let conn = Arc::clone(&conn);
                async move { Ok::<_, Infallible>(conn.handle(request).await) }
            })
        };

        let result = http1::Builder::new()
            .preserve_header_case(true)
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades()
            .await;
        if let Err(e) = result {
            tracing::debug!(connection_id = %self.id, peer = %self.peer, error = %e, "Client connection error");
        }

        let pending = self
            .pending_tunnel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            self.run_tunnel(pending).await;
        }

        self.note(ConnectionEvent::Closed);
    }

    async fn handle(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let event = if request.method() == Method::CONNECT {
            ConnectionEvent::ConnectRequest
        } else {
            ConnectionEvent::HttpRequest
        };
        if let Err(e) = self.advance(event) {
            tracing::warn!(connection_id = %self.id, error = %e, "Request refused in current connection state");
            return codec::text_response(StatusCode::BAD_REQUEST, format!("Bad Request: {e}"), true);
        }

        if request.method() == Method::CONNECT {
            self.handle_connect(request)
        } else {
            self.forward_http(request).await
        }
    }

    fn handle_connect(&self, mut request: Request<Incoming>) -> Response<Full<Bytes>> {
        let start = Instant::now();
        let authority = request
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| request.uri().to_string());
        let headers = codec::serialize_headers(request.headers());

        let target = match Target::for_connect(request.uri()) {
            Ok(target) => target,
            Err(e) => {
                let recorder = Recorder::start(
                    Transaction::new("CONNECT", authority, headers),
                    Arc::clone(&self.ctx.observer),
                );
                let response = self.fail(&recorder, StatusCode::BAD_GATEWAY, &e);
                metrics::record_transaction("CONNECT", response.status().as_u16(), start);
                return response;
            }
        };

        let transaction = Transaction::tunnel(authority, headers);
        tracing::info!(
            connection_id = %self.id,
            transaction_id = %transaction.id(),
            backend = %target.authority(),
            "CONNECT tunnel requested"
        );
        self.ctx.observer.on_transaction(&transaction);
        metrics::record_transaction("CONNECT", 200, start);

        let upgrade = hyper::upgrade::on(&mut request);
        *self
            .pending_tunnel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(PendingTunnel { upgrade, target });
        codec::connect_established()
    }

    async fn run_tunnel(&self, pending: PendingTunnel) {
        let upgraded = match pending.upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "CONNECT upgrade failed");
                return;
            }
        };
        self.note(ConnectionEvent::Upgraded);

        let backend = match self.ctx.connector.connect_tcp(&pending.target).await {
            Ok(stream) => stream,
            Err(e) => {
                metrics::record_backend_error(e.kind());
                tracing::warn!(
                    connection_id = %self.id,
                    backend = %pending.target.authority(),
                    error = %e,
                    "Tunnel backend unreachable, closing client"
                );
                return;
            }
        };

        let stats = tunnel::relay(TokioIo::new(upgraded), backend).await;
        tracing::debug!(
            connection_id = %self.id,
            backend = %pending.target.authority(),
            client_to_backend = stats.client_to_backend,
            backend_to_client = stats.backend_to_client,
            "Tunnel finished"
        );
    }

    async fn forward_http(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let start = Instant::now();
        let method = request.method().clone();
        let url = backend::request_url(&request);
        let recorder = Recorder::start(
            Transaction::new(
                method.as_str(),
                url.clone(),
                codec::serialize_headers(request.headers()),
            ),
            Arc::clone(&self.ctx.observer),
        );
        let _guard = recorder.guard();
        tracing::debug!(
            connection_id = %self.id,
            transaction_id = %recorder.id(),
            method = %method,
            url = %url,
            "Forwarding request"
        );

        let response = self.exchange(&recorder, &method, &url, request).await;
        metrics::record_transaction(method.as_str(), response.status().as_u16(), start);
        self.note(ConnectionEvent::ResponseSent);
        response
    }

    async fn exchange(
        &self,
        recorder: &Recorder,
        method: &Method,
        url: &str,
        request: Request<Incoming>,
    ) -> Response<Full<Bytes>> {
        let target = match Target::from_request(&request) {
            Ok(target) => target,
            Err(e) => return self.fail(recorder, StatusCode::BAD_GATEWAY, &e),
        };

        let (parts, body) = request.into_parts();
        let outbound = Request::from_parts(parts, RecordingBody::new(body, recorder.clone()));

        let (response, session) = match self.ctx.connector.forward(&target, outbound).await {
            Ok(ok) => ok,
            Err(e) => {
                let status = if recorder.client_failed() {
                    StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    StatusCode::BAD_GATEWAY
                };
                return self.fail(recorder, status, &e);
            }
        };

        let (mut parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return self.fail(recorder, StatusCode::BAD_GATEWAY, &ProxyError::Http(e))
            }
        };
        drop(session);

        let original = parts.status;
        let rewritten = self.ctx.rewrite.apply_rewrite(original.as_u16(), url);
        parts.status = StatusCode::from_u16(rewritten).unwrap_or(original);
        if parts.status != original {
            metrics::record_status_rewrite();
            tracing::info!(
                connection_id = %self.id,
                transaction_id = %recorder.id(),
                url = %url,
                original = original.as_u16(),
                status = parts.status.as_u16(),
                "Response status rewritten"
            );
        }

        recorder.complete(original.as_u16(), parts.status.as_u16(), &parts.headers, &body);
        if !codec::is_bodiless(method, parts.status) {
            codec::reframe_buffered(&mut parts.headers, body.len());
        }
        Response::from_parts(parts, Full::new(body))
    }

    /// Record `error` against the transaction and build the response that
    /// closes the client connection.
    fn fail(&self, recorder: &Recorder, status: StatusCode, error: &ProxyError) -> Response<Full<Bytes>> {
        let message = format!(
            "{}: {}",
            status.canonical_reason().unwrap_or("Error"),
            error
        );
        tracing::warn!(
            connection_id = %self.id,
            transaction_id = %recorder.id(),
            status = status.as_u16(),
            error = %error,
            "Exchange failed"
        );
        metrics::record_backend_error(error.kind());
        recorder.fail(status.as_u16(), &message);
        codec::text_response(status, message, true)
    }
}
