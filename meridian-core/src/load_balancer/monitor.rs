//! Heartbeat intake and staleness sweeps.

use std::time::{Instant, SystemTime};

use tracing::info;

use crate::domain::heartbeat::Heartbeat;
use crate::domain::server::{CandidateServer, ServerStatus};
use crate::load_balancer::pool::{PoolState, ServerPool};

impl ServerPool {
    /// Fold one heartbeat into the pool. Returns the server's resulting status.
    pub fn on_heartbeat(&self, heartbeat: Heartbeat) -> ServerStatus {
        self.on_heartbeat_at(heartbeat, Instant::now())
    }

    /// [`ServerPool::on_heartbeat`] with an explicit receive time.
    pub fn on_heartbeat_at(&self, heartbeat: Heartbeat, now: Instant) -> ServerStatus {
        let policy = self.config.ranking;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let server = state
            .servers
            .entry(heartbeat.server_id.clone())
            .or_insert_with_key(|id| {
                info!(server_id = %id, "new edge server");
                CandidateServer::new(id.clone())
            });

        // The key moves with the load, so take the old one out before touching it.
        state.ranked.remove(&policy.key(server));

        let previous = server.status;
        server.apply_heartbeat(heartbeat, now, SystemTime::now());
        if server.status.is_running() {
            state.ranked.insert(policy.key(server));
        }

        if previous != server.status {
            info!(
                server_id = %server.id,
                from = %previous,
                to = %server.status,
                "edge server status changed"
            );
        }
        server.status
    }

    /// Mark servers in `known` whose last heartbeat is older than the message timeout.
    ///
    /// A server that never sent a heartbeat counts as late, and ids not yet in the
    /// table are registered first, so they are recorded as timed out. Returns the
    /// ids that moved to `MessageTimeout` in this pass.
    pub fn sweep_known_at<I, S>(&self, known: I, now: Instant) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock();
        known
            .into_iter()
            .filter_map(|id| {
                let id = id.as_ref();
                if !state.servers.contains_key(id) {
                    info!(server_id = id, "edge server referenced before its first heartbeat");
                    state
                        .servers
                        .insert(id.to_string(), CandidateServer::new(id));
                }
                self.expire_if_late(&mut state, id, now)
            })
            .collect()
    }

    /// Sweep every known server against `now`.
    pub fn sweep_at(&self, now: Instant) -> Vec<String> {
        let mut state = self.state.lock();
        let ids: Vec<String> = state.servers.keys().cloned().collect();
        ids.iter()
            .filter_map(|id| self.expire_if_late(&mut state, id, now))
            .collect()
    }

    /// Sweep every known server against the current time.
    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(Instant::now())
    }

    fn expire_if_late(&self, state: &mut PoolState, id: &str, now: Instant) -> Option<String> {
        let timeout = self.config.message_timeout;
        let server = state.servers.get_mut(id)?;

        let late = match server.last_heartbeat {
            Some(at) => now.saturating_duration_since(at) > timeout,
            None => true,
        };
        if !late || server.status == ServerStatus::MessageTimeout {
            return None;
        }

        state.ranked.remove(&self.config.ranking.key(server));
        let previous = server.status;
        server.status = ServerStatus::MessageTimeout;
        info!(
            server_id = %server.id,
            from = %previous,
            timeout_ms = timeout.as_millis() as u64,
            "edge server heartbeat timed out"
        );
        Some(server.id.clone())
    }
}
