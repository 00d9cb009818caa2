//! In-memory traffic history.
//!
//! Retains the latest copy of each transaction, keyed by id, in first-seen
//! order. Bounded: once `limit` transactions are held the oldest is evicted.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;

use crate::capture::observer::TransactionObserver;
use crate::capture::transaction::{Transaction, TransactionId};

/// Observer that keeps recent transactions for later inspection.
pub struct TrafficHistory {
    entries: DashMap<TransactionId, Transaction>,
    order: Mutex<VecDeque<TransactionId>>,
    limit: usize,
}

impl TrafficHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    /// Insert a transaction or replace the stored copy with the same id.
    pub fn upsert(&self, transaction: &Transaction) {
        let id = transaction.id();
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        if self.entries.insert(id, transaction.clone()).is_none() {
            order.push_back(id);
            while order.len() > self.limit {
                if let Some(evicted) = order.pop_front() {
                    self.entries.remove(&evicted);
                }
            }
        }
    }

    pub fn get(&self, id: &TransactionId) -> Option<Transaction> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// All retained transactions, oldest first.
    pub fn list(&self) -> Vec<Transaction> {
        let order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Transactions matching `query`, oldest first. A blank query matches everything.
    ///
    /// Method, URL, request headers and request body are matched as
    /// case-insensitive substrings; the status code as a decimal substring.
    pub fn filter(&self, query: &str) -> Vec<Transaction> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.list();
        }
        self.list()
            .into_iter()
            .filter(|tx| matches_query(tx, &query))
            .collect()
    }

    pub fn clear(&self) {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.clear();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn matches_query(tx: &Transaction, query: &str) -> bool {
    [tx.method(), tx.url(), tx.request_headers(), tx.request_body()]
        .iter()
        .any(|field| field.to_lowercase().contains(query))
        || tx.status_code().to_string().contains(query)
}

impl TransactionObserver for TrafficHistory {
    fn on_transaction(&self, transaction: &Transaction) {
        self.upsert(transaction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(method: &str, url: &str) -> Transaction {
        Transaction::new(method, url, "host: example.com\n")
    }

    #[test]
    fn upsert_replaces_in_place() {
        let history = TrafficHistory::new(10);
        let first = tx("GET", "http://example.com/a");
        let mut updated = first.clone();
        updated.set_status(200, 200);

        history.upsert(&first);
        history.upsert(&tx("GET", "http://example.com/b"));
        history.upsert(&updated);

        let list = history.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id(), first.id());
        assert_eq!(list[0].status_code(), 200);
    }

    #[test]
    fn evicts_oldest_over_limit() {
        let history = TrafficHistory::new(2);
        let a = tx("GET", "/a");
        let b = tx("GET", "/b");
        let c = tx("GET", "/c");
        history.upsert(&a);
        history.upsert(&b);
        history.upsert(&c);

        assert_eq!(history.len(), 2);
        assert!(history.get(&a.id()).is_none());
        let urls: Vec<_> = history.list().iter().map(|t| t.url().to_string()).collect();
        assert_eq!(urls, ["/b", "/c"]);
    }

    #[test]
    fn filter_matches_fields_and_status() {
        let history = TrafficHistory::new(10);
        let mut users = tx("POST", "http://example.com/API/users");
        users.set_request_body("{\"name\":\"Ada\"}".into());
        users.set_status(404, 404);
        let mut orders = tx("GET", "http://example.com/orders");
        orders.set_status(200, 200);
        history.upsert(&users);
        history.upsert(&orders);

        assert_eq!(history.filter("api/USERS").len(), 1);
        assert_eq!(history.filter("post").len(), 1);
        assert_eq!(history.filter("ada").len(), 1);
        assert_eq!(history.filter("40")[0].id(), users.id());
        assert_eq!(history.filter("example.com").len(), 2);
        assert_eq!(history.filter("  ").len(), 2);
        assert!(history.filter("missing").is_empty());
    }

    #[test]
    fn clear_empties_history() {
        let history = TrafficHistory::new(10);
        history.on_transaction(&tx("GET", "/"));
        history.clear();
        assert!(history.is_empty());
        assert!(history.list().is_empty());
    }
}
