//! Per-exchange transaction recorder.
//!
//! # Responsibilities
//! - Own the in-flight `Transaction` for one HTTP exchange
//! - Accumulate request body chunks as the backend connector streams them
//! - Emit a copy to the observer at creation, request completion and response
//!
//! # Design Decisions
//! - State sits behind a `std::sync::Mutex`; it is never held across an await
//!   and observers are called with a clone after the lock is released
//! - `finish_request` is idempotent: the body may end inside the backend
//!   client or be finished explicitly once the response is in
//! - Only the first of `complete` / `fail` is recorded; an [`ExchangeGuard`]
//!   dropped before either ran finalizes the transaction as a client abort

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use hyper::HeaderMap;

use crate::capture::observer::TransactionObserver;
use crate::capture::transaction::{Transaction, TransactionId};
use crate::http::codec;

struct RecorderState {
    transaction: Transaction,
    request_body: Vec<u8>,
    request_complete: bool,
    client_failed: bool,
    finished: bool,
    started: Instant,
}

/// Shared handle to one exchange's transaction.
#[derive(Clone)]
pub struct Recorder {
    state: Arc<Mutex<RecorderState>>,
    observer: Arc<dyn TransactionObserver>,
}

impl Recorder {
    /// Begin recording and emit the pending transaction.
    pub fn start(transaction: Transaction, observer: Arc<dyn TransactionObserver>) -> Self {
        observer.on_transaction(&transaction);
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                transaction,
                request_body: Vec::new(),
                request_complete: false,
                client_failed: false,
                finished: false,
                started: Instant::now(),
            })),
            observer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> TransactionId {
        self.lock().transaction.id()
    }

    /// Current copy of the transaction.
    pub fn snapshot(&self) -> Transaction {
        self.lock().transaction.clone()
    }

    pub fn append_request_chunk(&self, chunk: &[u8]) {
        let mut state = self.lock();
        if !state.request_complete {
            state.request_body.extend_from_slice(chunk);
        }
    }

    /// Note that reading the request body from the client failed.
    pub fn mark_client_error(&self) {
        self.lock().client_failed = true;
    }

    /// Whether the client side failed while its body was being streamed.
    pub fn client_failed(&self) -> bool {
        self.lock().client_failed
    }

    /// Whether a final status has been recorded.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Guard that finalizes the transaction if the exchange is abandoned.
    pub fn guard(&self) -> ExchangeGuard {
        ExchangeGuard {
            recorder: self.clone(),
        }
    }

    /// Mark the request body complete and emit. Later calls do nothing.
    pub fn finish_request(&self) {
        let emitted = {
            let mut state = self.lock();
            if state.request_complete {
                return;
            }
            state.request_complete = true;
            let body = codec::decode_request_body(&state.request_body);
            state.request_body = Vec::new();
            state.transaction.set_request_body(body);
            state.transaction.clone()
        };
        self.observer.on_transaction(&emitted);
    }

    /// Record the backend response (after any rewrite) and emit.
    pub fn complete(&self, original_status: u16, final_status: u16, headers: &HeaderMap, body: &[u8]) {
        self.finish_request();
        let emitted = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            let elapsed = state.started.elapsed();
            let tx = &mut state.transaction;
            tx.set_status(final_status, original_status);
            tx.set_response(
                codec::serialize_headers(headers),
                codec::decode_response_body(headers, body),
            );
            tx.set_duration_ms(elapsed.as_millis() as u64);
            tx.clone()
        };
        self.observer.on_transaction(&emitted);
    }

    /// Record a proxy-generated error status with its message as the body, and emit.
    pub fn fail(&self, status: u16, message: &str) {
        self.finish_request();
        let emitted = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            let elapsed = state.started.elapsed();
            let tx = &mut state.transaction;
            tx.set_status(status, status);
            tx.set_response(String::new(), message.to_string());
            tx.set_duration_ms(elapsed.as_millis() as u64);
            tx.clone()
        };
        self.observer.on_transaction(&emitted);
    }
}

/// Message recorded when the client goes away before the exchange finished.
pub const CLIENT_CLOSED: &str = "Internal Server Error: client closed connection";

/// Held for the lifetime of one exchange.
///
/// hyper drops the service future when the client disconnects mid-exchange;
/// the guard then records a 500 so the transaction never stays pending.
pub struct ExchangeGuard {
    recorder: Recorder,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if !self.recorder.is_finished() {
            tracing::debug!(transaction_id = %self.recorder.id(), "Exchange abandoned by client");
            self.recorder.fail(500, CLIENT_CLOSED);
        }
    }
}

/// Request body wrapper that copies every data frame into a [`Recorder`]
/// while passing it through unchanged.
pub struct RecordingBody<B> {
    inner: B,
    recorder: Recorder,
}

impl<B> RecordingBody<B> {
    pub fn new(inner: B, recorder: Recorder) -> Self {
        Self { inner, recorder }
    }
}

impl<B> Body for RecordingBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.recorder.append_request_chunk(data);
                }
                if this.inner.is_end_stream() {
                    this.recorder.finish_request();
                }
            }
            Some(Err(_)) => this.recorder.mark_client_error(),
            None => this.recorder.finish_request(),
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::observer::ChannelObserver;
    use http_body_util::{BodyExt, Full};

    fn recorder() -> (Recorder, tokio::sync::mpsc::UnboundedReceiver<Transaction>) {
        let (observer, rx) = ChannelObserver::new();
        let tx = Transaction::new("POST", "http://example.com/api", "host: example.com\n");
        (Recorder::start(tx, Arc::new(observer)), rx)
    }

    #[tokio::test]
    async fn emits_at_creation_request_and_response() {
        let (recorder, mut rx) = recorder();
        recorder.append_request_chunk(b"a=1");
        recorder.append_request_chunk(b"&b=2");

        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        recorder.complete(404, 200, &headers, b"not found");

        let created = rx.recv().await.unwrap();
        assert!(created.is_pending());
        assert_eq!(created.request_body(), "");

        let requested = rx.recv().await.unwrap();
        assert_eq!(requested.request_body(), "a=1&b=2");
        assert!(requested.is_pending());

        let done = rx.recv().await.unwrap();
        assert_eq!(done.id(), created.id());
        assert_eq!(done.status_code(), 200);
        assert_eq!(done.original_status_code(), 404);
        assert!(done.is_modified());
        assert_eq!(done.response_body(), "not found");
        assert_eq!(done.response_headers(), "content-type: text/plain\n");
        assert!(done.duration_ms().is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn finish_request_emits_once() {
        let (recorder, mut rx) = recorder();
        recorder.finish_request();
        recorder.finish_request();

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failure_records_message() {
        let (recorder, mut rx) = recorder();
        recorder.fail(502, "Bad Gateway: connection refused");

        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(last.status_code(), 502);
        assert!(!last.is_modified());
        assert_eq!(last.response_body(), "Bad Gateway: connection refused");
    }

    #[tokio::test]
    async fn first_final_status_wins() {
        let (recorder, mut rx) = recorder();
        recorder.fail(502, "Bad Gateway: reset");
        recorder.complete(200, 200, &HeaderMap::new(), b"late");
        recorder.fail(500, "again");

        let emitted: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(emitted.len(), 3);
        assert_eq!(emitted[2].status_code(), 502);
        assert_eq!(recorder.snapshot().response_body(), "Bad Gateway: reset");
    }

    #[tokio::test]
    async fn dropped_guard_finalizes_pending_exchange() {
        let (recorder, mut rx) = recorder();
        drop(recorder.guard());

        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(last.status_code(), 500);
        assert_eq!(last.original_status_code(), 500);
        assert_eq!(last.response_body(), CLIENT_CLOSED);
        assert!(recorder.is_finished());
    }

    #[tokio::test]
    async fn guard_is_silent_after_completion() {
        let (recorder, mut rx) = recorder();
        let guard = recorder.guard();
        recorder.complete(200, 200, &HeaderMap::new(), b"ok");
        drop(guard);

        let emitted: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(emitted.len(), 3);
        assert_eq!(emitted[2].status_code(), 200);
    }

    #[tokio::test]
    async fn recording_body_passes_data_through() {
        let (recorder, mut rx) = recorder();
        let body = RecordingBody::new(Full::new(Bytes::from_static(b"payload")), recorder.clone());

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"payload");

        rx.recv().await.unwrap();
        let requested = rx.recv().await.unwrap();
        assert_eq!(requested.request_body(), "payload");
        assert_eq!(recorder.snapshot().request_body(), "payload");
    }
}
