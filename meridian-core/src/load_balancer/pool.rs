//! The shared pool of known edge servers.
//!
//! The server table and the ranked set of running servers live behind a single
//! mutex. Each operation holds it for one read-modify-write sequence and never
//! across I/O, and neither structure is handed out by reference.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::domain::server::CandidateServer;
use crate::load_balancer::ranking::{RankKey, RankingPolicy};

/// Tunables for a [`ServerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Heartbeat age after which the sweep marks a server as timed out
    pub message_timeout: Duration,
    /// How servers are scored
    pub ranking: RankingPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_millis(5000),
            ranking: RankingPolicy::Bandwidth,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolState {
    pub(crate) servers: HashMap<String, CandidateServer>,
    pub(crate) ranked: BTreeSet<RankKey>,
    pub(crate) redirect_total: u64,
}

impl PoolState {
    pub(crate) fn total_connections(&self) -> i64 {
        self.servers
            .values()
            .map(|s| s.connect_count.max(0) + s.redirect_count)
            .sum()
    }
}

/// Known edge servers plus the ranked set of those eligible for redirects.
///
/// Invariant: a server is in the ranked set if and only if its status is
/// `Running`, and its entry there is keyed by its current load.
#[derive(Debug)]
pub struct ServerPool {
    pub(crate) config: PoolConfig,
    pub(crate) state: Mutex<PoolState>,
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// The pool's configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Redirects handed out since the pool was created.
    pub fn redirect_total(&self) -> u64 {
        self.state.lock().redirect_total
    }

    /// Sum of reported connections and pending redirects over every known server.
    pub fn total_connections(&self) -> i64 {
        self.state.lock().total_connections()
    }

    /// Number of servers currently eligible for selection.
    pub fn eligible_count(&self) -> usize {
        self.state.lock().ranked.len()
    }

    /// Number of servers ever seen.
    pub fn known_count(&self) -> usize {
        self.state.lock().servers.len()
    }

    /// Whether `id` is currently in the ranked set.
    pub fn is_eligible(&self, id: &str) -> bool {
        let state = self.state.lock();
        state
            .servers
            .get(id)
            .map(|server| state.ranked.contains(&self.config.ranking.key(server)))
            .unwrap_or(false)
    }

    /// Ids of eligible servers, best first.
    pub fn ranked_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .ranked
            .iter()
            .map(|key| key.id().to_string())
            .collect()
    }

    /// Ids of every known server, in no particular order.
    pub fn known_ids(&self) -> Vec<String> {
        self.state.lock().servers.keys().cloned().collect()
    }

    /// A copy of one server's current state.
    pub fn candidate(&self, id: &str) -> Option<CandidateServer> {
        self.state.lock().servers.get(id).cloned()
    }
}

impl Default for ServerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// A thread-safe reference to the server pool.
pub type SharedServerPool = Arc<ServerPool>;
