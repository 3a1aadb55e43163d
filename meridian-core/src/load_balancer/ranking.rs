//! Ordering of candidate servers.
//!
//! Every selection picks the least-loaded running server and then bumps its
//! `redirect_count`, so a burst of selections between two heartbeats spreads
//! across the pool instead of piling onto one server.

use serde::{Deserialize, Serialize};

use crate::domain::server::CandidateServer;

/// How a server's load is scored. Lower scores are selected first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingPolicy {
    /// `redirect_count + out_rate / weight`: prefers servers pushing less
    /// outbound bandwidth relative to their capacity.
    #[default]
    Bandwidth,
    /// `redirect_count + connect_count`: plain connection counting, ignores weight.
    Connections,
}

impl RankingPolicy {
    /// Score a server under this policy.
    ///
    /// Unknown (negative) rates and counts score as zero, and the weight is
    /// clamped to at least 1.
    pub fn load(self, server: &CandidateServer) -> i64 {
        let base = match self {
            Self::Bandwidth => server.out_rate.max(0) / server.weight.max(1),
            Self::Connections => server.connect_count.max(0),
        };
        server.redirect_count.saturating_add(base)
    }

    /// The ordering key of a server under this policy.
    pub fn key(self, server: &CandidateServer) -> RankKey {
        RankKey {
            load: self.load(server),
            id: server.id.clone(),
        }
    }
}

/// Position of a server in the ranked set.
///
/// Ordered by load, then by server id, so equal loads always resolve the same way.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RankKey {
    load: i64,
    id: String,
}

impl RankKey {
    /// The load score.
    pub fn load(&self) -> i64 {
        self.load
    }

    /// The server id.
    pub fn id(&self) -> &str {
        &self.id
    }
}
