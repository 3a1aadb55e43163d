//! Candidate edge server models.

use std::collections::HashMap;
use std::fmt;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::heartbeat::Heartbeat;
use crate::load_balancer::ranking::RankingPolicy;

/// Liveness of an edge server, as reported by its heartbeats or inferred by the sweep.
///
/// On the wire the status travels as an integer code: `0` unknown, `1` running,
/// `2` stopped, `3` message timeout. Unrecognised codes read as [`ServerStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ServerStatus {
    /// No valid status has been reported yet
    #[default]
    Unknown,
    /// Heartbeating normally; the only status eligible for redirects
    Running,
    /// Heartbeats stopped arriving within the configured timeout
    MessageTimeout,
    /// The server announced a shutdown
    Stopped,
}

impl ServerStatus {
    /// Map a wire status code onto a status.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Running,
            2 => Self::Stopped,
            3 => Self::MessageTimeout,
            _ => Self::Unknown,
        }
    }

    /// The wire status code.
    pub fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Running => 1,
            Self::Stopped => 2,
            Self::MessageTimeout => 3,
        }
    }

    /// Parse either a numeric code or a status name (`running`, `stopped`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(code) = raw.parse::<i64>() {
            return Some(Self::from_code(code));
        }
        match raw.to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "msgtimeout" | "messagetimeout" => Some(Self::MessageTimeout),
            _ => None,
        }
    }

    /// Lower-case name used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::MessageTimeout => "msgtimeout",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a server in this status belongs in the ranked set.
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl From<i64> for ServerStatus {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

impl From<ServerStatus> for i64 {
    fn from(status: ServerStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per virtual-host address record carried in heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VHostAddress {
    /// Host (optionally `host:port`) clients of this vhost are redirected to
    #[serde(rename = "redirectAddress", default)]
    pub redirect_address: Option<String>,
}

impl VHostAddress {
    /// Build a record pointing at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            redirect_address: Some(address.into()),
        }
    }
}

/// Why a vhost-specific lookup fell back to the default address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    NoVHostData,
    UnknownVHost,
    MissingAddress,
}

/// One known edge server and its most recently reported load.
#[derive(Debug, Clone)]
pub struct CandidateServer {
    /// Opaque server id, stable for the server's lifetime
    pub id: String,
    /// Current liveness
    pub status: ServerStatus,
    /// Connected clients; `-1` when the last heartbeat did not carry a usable value
    pub connect_count: i64,
    /// Inbound bytes/sec; `-1` when unknown
    pub in_rate: i64,
    /// Outbound bytes/sec; `-1` when unknown
    pub out_rate: i64,
    /// Capacity multiplier, always at least 1
    pub weight: i64,
    /// Selections since the last heartbeat
    pub redirect_count: i64,
    /// Redirect addresses keyed by virtual host, absent for vhost-unaware senders
    pub address_by_vhost: Option<HashMap<String, VHostAddress>>,
    /// Legacy vhost-unaware redirect address
    pub default_address: Option<String>,
    /// Monotonic time of the last heartbeat, used for staleness
    pub last_heartbeat: Option<Instant>,
    /// Wall-clock time of the last heartbeat, used for reporting
    pub last_heartbeat_at: Option<SystemTime>,
}

impl CandidateServer {
    /// Create a server in the `Unknown` state with no load data.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ServerStatus::Unknown,
            connect_count: 0,
            in_rate: 0,
            out_rate: 0,
            weight: 1,
            redirect_count: 0,
            address_by_vhost: None,
            default_address: None,
            last_heartbeat: None,
            last_heartbeat_at: None,
        }
    }

    fn vhost_address(&self, vhost: &str) -> Result<&str, Fallback> {
        let vhosts = self.address_by_vhost.as_ref().ok_or(Fallback::NoVHostData)?;
        let entry = vhosts.get(vhost).ok_or(Fallback::UnknownVHost)?;
        entry
            .redirect_address
            .as_deref()
            .filter(|addr| !addr.is_empty())
            .ok_or(Fallback::MissingAddress)
    }

    /// Resolve the address clients of `vhost` should be sent to.
    ///
    /// An empty vhost name asks for the default address. When the server has no
    /// usable entry for the vhost a warning is logged and the default address is
    /// returned instead.
    pub fn redirect_address(&self, vhost: &str) -> Option<String> {
        if vhost.is_empty() {
            return self.default_address.clone();
        }
        match self.vhost_address(vhost) {
            Ok(addr) => Some(addr.to_string()),
            Err(reason) => {
                warn!(
                    server_id = %self.id,
                    vhost,
                    reason = ?reason,
                    fallback = self.default_address.as_deref().unwrap_or("-"),
                    "no redirect address for vhost, using default address"
                );
                self.default_address.clone()
            }
        }
    }

    /// Fold a heartbeat into this server's state.
    ///
    /// A heartbeat without a `customProperties` block resets the weight to 1 and
    /// keeps the last vhost map. Inside a block, a missing or non-positive weight
    /// keeps the current one.
    ///
    /// The caller must take the server out of the ranked set first, since the
    /// ordering key changes here.
    pub(crate) fn apply_heartbeat(&mut self, heartbeat: Heartbeat, now: Instant, wall: SystemTime) {
        match heartbeat.custom {
            Some(custom) => {
                self.address_by_vhost = Some(custom.vhosts);
                match custom.weight {
                    Some(weight) if weight > 0 => self.weight = weight,
                    Some(weight) => {
                        debug!(server_id = %self.id, weight, "ignoring non-positive weight");
                    }
                    None => {}
                }
            }
            None => self.weight = 1,
        }

        self.status = heartbeat.status;
        self.connect_count = heartbeat.connect_count.unwrap_or(-1);
        self.in_rate = heartbeat.in_rate.unwrap_or(-1);
        self.out_rate = heartbeat.out_rate.unwrap_or(-1);
        if let Some(redirect) = heartbeat.redirect {
            self.default_address = Some(redirect);
        }
        self.redirect_count = 0;
        self.last_heartbeat = Some(now);
        self.last_heartbeat_at = Some(wall);
    }

    /// Snapshot this server for diagnostics, resolving the address for `vhost`
    /// and scoring it the way `policy` ranks it.
    pub fn descriptor(&self, vhost: &str, policy: RankingPolicy) -> ServerDescriptor {
        let redirect = if vhost.is_empty() {
            self.default_address.clone()
        } else {
            match self.vhost_address(vhost) {
                Ok(addr) => Some(addr.to_string()),
                Err(reason) => {
                    debug!(server_id = %self.id, vhost, reason = ?reason, "describing server with default address");
                    self.default_address.clone()
                }
            }
        };

        ServerDescriptor {
            server_id: self.id.clone(),
            status: self.status.as_str(),
            redirect,
            weight: self.weight,
            in_rate: self.in_rate,
            out_rate: self.out_rate,
            connect_count: self.connect_count,
            redirect_count: self.redirect_count,
            load_score: policy.load(self),
            last_message: self.last_heartbeat_at.map(|at| {
                DateTime::<Utc>::from(at).to_rfc3339_opts(SecondsFormat::Millis, true)
            }),
        }
    }
}

/// Read-only diagnostic view of one edge server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Server id
    pub server_id: String,
    /// Status name
    pub status: &'static str,
    /// Address resolved for the requested vhost, or the default address
    pub redirect: Option<String>,
    /// Capacity multiplier
    pub weight: i64,
    /// Inbound bytes/sec
    pub in_rate: i64,
    /// Outbound bytes/sec
    pub out_rate: i64,
    /// Connected clients
    pub connect_count: i64,
    /// Selections since the last heartbeat
    pub redirect_count: i64,
    /// Score under the active ranking policy; lower is selected first
    pub load_score: i64,
    /// UTC timestamp of the last heartbeat
    pub last_message: Option<String>,
}

/// Outcome of a redirect query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Send the client to this address
    Redirect(String),
    /// No edge server is currently running
    NoEligibleServer,
}

impl RedirectDecision {
    /// The chosen address, if any.
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Redirect(addr) => Some(addr),
            Self::NoEligibleServer => None,
        }
    }

    /// Convert into the chosen address, if any.
    pub fn into_address(self) -> Option<String> {
        match self {
            Self::Redirect(addr) => Some(addr),
            Self::NoEligibleServer => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_vhosts(entries: &[(&str, Option<&str>)]) -> CandidateServer {
        let mut server = CandidateServer::new("edge-a");
        server.default_address = Some("10.0.0.1".to_string());
        server.address_by_vhost = Some(
            entries
                .iter()
                .map(|(name, addr)| {
                    (
                        name.to_string(),
                        VHostAddress {
                            redirect_address: addr.map(str::to_string),
                        },
                    )
                })
                .collect(),
        );
        server
    }

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            ServerStatus::Unknown,
            ServerStatus::Running,
            ServerStatus::Stopped,
            ServerStatus::MessageTimeout,
        ] {
            assert_eq!(ServerStatus::from_code(status.code()), status);
        }
        assert_eq!(ServerStatus::from_code(42), ServerStatus::Unknown);
    }

    #[test]
    fn test_status_parse_accepts_names_and_codes() {
        assert_eq!(ServerStatus::parse(" 1 "), Some(ServerStatus::Running));
        assert_eq!(ServerStatus::parse("Stopped"), Some(ServerStatus::Stopped));
        assert_eq!(ServerStatus::parse("msgtimeout"), Some(ServerStatus::MessageTimeout));
        assert_eq!(ServerStatus::parse("bogus"), None);
    }

    #[test]
    fn test_redirect_address_uses_vhost_entry() {
        let server = with_vhosts(&[("live", Some("edge-a.live.example"))]);
        assert_eq!(server.redirect_address("live").as_deref(), Some("edge-a.live.example"));
    }

    #[test]
    fn test_redirect_address_falls_back_for_unknown_vhost() {
        let server = with_vhosts(&[("live", Some("edge-a.live.example"))]);
        assert_eq!(server.redirect_address("vod").as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_redirect_address_falls_back_when_vhost_has_no_address() {
        let server = with_vhosts(&[("live", None)]);
        assert_eq!(server.redirect_address("live").as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_redirect_address_without_vhost_data() {
        let mut server = CandidateServer::new("legacy");
        server.default_address = Some("192.168.1.5".to_string());
        assert_eq!(server.redirect_address("live").as_deref(), Some("192.168.1.5"));
        assert_eq!(server.redirect_address("").as_deref(), Some("192.168.1.5"));
    }

    #[test]
    fn test_descriptor_reports_load_score() {
        let mut server = with_vhosts(&[("live", Some("edge-a.live.example"))]);
        server.out_rate = 9000;
        server.weight = 3;
        server.status = ServerStatus::Running;

        let descriptor = server.descriptor("live", RankingPolicy::Bandwidth);
        assert_eq!(descriptor.server_id, "edge-a");
        assert_eq!(descriptor.status, "running");
        assert_eq!(descriptor.redirect.as_deref(), Some("edge-a.live.example"));
        assert_eq!(descriptor.load_score, 3000);
        assert_eq!(descriptor.last_message, None);
    }

    #[test]
    fn test_descriptor_scores_by_connections() {
        let mut server = with_vhosts(&[]);
        server.out_rate = 9000;
        server.weight = 3;
        server.connect_count = 12;
        server.redirect_count = 2;

        assert_eq!(server.descriptor("", RankingPolicy::Connections).load_score, 14);
        assert_eq!(server.descriptor("", RankingPolicy::Bandwidth).load_score, 3002);
    }

    #[test]
    fn test_heartbeat_without_block_resets_weight() {
        let mut server = with_vhosts(&[("live", Some("edge-a.live.example"))]);
        server.weight = 5;

        server.apply_heartbeat(Heartbeat::running("edge-a", 100), Instant::now(), SystemTime::now());
        assert_eq!(server.weight, 1);
        assert_eq!(server.redirect_address("live").as_deref(), Some("edge-a.live.example"));
    }

    #[test]
    fn test_status_serializes_as_code() {
        let json = serde_json::to_string(&ServerStatus::Stopped).unwrap();
        assert_eq!(json, "2");
        let status: ServerStatus = serde_json::from_str("1").unwrap();
        assert_eq!(status, ServerStatus::Running);
    }
}
