//! Lock-free hot pool of idle upstream connections using DashMap and SegQueue.

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::client::conn::http1::SendRequest;
use std::sync::Arc;

/// Idle HTTP/1.1 senders.
pub type Sender = SendRequest<Empty<Bytes>>;

/// Caches idle upstream connections per `host:port`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPool {
    idle_connections: Arc<DashMap<String, Arc<SegQueue<Sender>>>>,
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop an idle sender for `authority`, skipping any that have closed.
    ///
    /// The caller must still wait for `ready()` before sending.
    pub fn try_pop(&self, authority: &str) -> Option<Sender> {
        let queue = self.idle_connections.get(authority)?.value().clone();
        while let Some(sender) = queue.pop() {
            if !sender.is_closed() {
                return Some(sender);
            }
        }
        None
    }

    /// Return a sender for reuse. Closed senders are dropped.
    pub fn push(&self, authority: &str, sender: Sender) {
        if sender.is_closed() {
            return;
        }

        let queue = self
            .idle_connections
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(SegQueue::new()))
            .value()
            .clone();

        queue.push(sender);
    }

    /// Number of idle senders held for `authority`, closed ones included.
    pub fn idle_count(&self, authority: &str) -> usize {
        self.idle_connections
            .get(authority)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
