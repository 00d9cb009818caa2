//! Transaction observers.
//!
//! The proxy calls `on_transaction` from its I/O tasks, once when a request
//! is first seen and again whenever the record gains new information.
//! Implementations must not block: anything slow belongs on the far side of
//! a channel (see [`ChannelObserver`]).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::capture::transaction::Transaction;

/// Receives every emission of every transaction.
pub trait TransactionObserver: Send + Sync {
    fn on_transaction(&self, transaction: &Transaction);
}

impl<F> TransactionObserver for F
where
    F: Fn(&Transaction) + Send + Sync,
{
    fn on_transaction(&self, transaction: &Transaction) {
        self(transaction)
    }
}

/// Observer used when nothing is listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransactionObserver for NoopObserver {
    fn on_transaction(&self, _transaction: &Transaction) {}
}

/// Forwards copies of each emission over an unbounded channel.
///
/// Sending never waits; once the receiver is gone emissions are dropped.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<Transaction>,
}

impl ChannelObserver {
    /// Create the observer and the receiving end for the consumer.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Transaction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransactionObserver for ChannelObserver {
    fn on_transaction(&self, transaction: &Transaction) {
        let _ = self.tx.send(transaction.clone());
    }
}

/// Writes one structured log event per emission.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl TransactionObserver for LoggingObserver {
    fn on_transaction(&self, tx: &Transaction) {
        if tx.is_pending() {
            tracing::debug!(
                transaction_id = %tx.id(),
                method = %tx.method(),
                url = %tx.url(),
                "Request captured"
            );
        } else if tx.is_modified() {
            tracing::info!(
                transaction_id = %tx.id(),
                method = %tx.method(),
                url = %tx.url(),
                original_status = tx.original_status_code(),
                status = tx.status_code(),
                duration_ms = ?tx.duration_ms(),
                "Exchange completed (status rewritten)"
            );
        } else {
            tracing::info!(
                transaction_id = %tx.id(),
                method = %tx.method(),
                url = %tx.url(),
                status = tx.status_code(),
                intercepted = tx.is_intercepted(),
                duration_ms = ?tx.duration_ms(),
                "Exchange completed"
            );
        }
    }
}

/// Dispatches each emission to several observers, in order.
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn TransactionObserver>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer to the end of the dispatch list.
    pub fn with(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl TransactionObserver for FanoutObserver {
    fn on_transaction(&self, transaction: &Transaction) {
        for observer in &self.observers {
            observer.on_transaction(transaction);
        }
    }
}
