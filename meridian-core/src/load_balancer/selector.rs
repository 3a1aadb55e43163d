//! Redirect selection.

use tracing::{debug, warn};

use crate::domain::server::{RedirectDecision, ServerDescriptor};
use crate::load_balancer::pool::ServerPool;

impl ServerPool {
    /// Pick the edge server for the next client of `vhost`.
    ///
    /// Takes the least-loaded running server, charges it one redirect so the next
    /// call may prefer another server, and resolves its address for the vhost (an
    /// empty vhost asks for the default address). Returns
    /// [`RedirectDecision::NoEligibleServer`] straight away when nothing is
    /// running; the pool is left untouched in that case.
    pub fn select_server(&self, vhost: &str) -> RedirectDecision {
        let policy = self.config.ranking;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(best) = state.ranked.pop_first() else {
            debug!(vhost, "no eligible edge servers");
            return RedirectDecision::NoEligibleServer;
        };

        let Some(server) = state.servers.get_mut(best.id()) else {
            // Ranked entries always have a table row; drop the orphan rather than loop on it.
            warn!(server_id = best.id(), "ranked server missing from table");
            return RedirectDecision::NoEligibleServer;
        };

        server.redirect_count += 1;
        state.ranked.insert(policy.key(server));
        state.redirect_total += 1;

        match server.redirect_address(vhost) {
            Some(address) => {
                debug!(
                    server_id = %server.id,
                    vhost,
                    address = %address,
                    redirect_count = server.redirect_count,
                    "selected edge server"
                );
                RedirectDecision::Redirect(address)
            }
            None => {
                warn!(server_id = %server.id, vhost, "selected edge server has no redirect address");
                RedirectDecision::NoEligibleServer
            }
        }
    }

    /// Describe every known server, running or not, ordered by load then id.
    ///
    /// Addresses are resolved for `vhost`. Nothing is mutated.
    pub fn describe_all(&self, vhost: &str) -> Vec<ServerDescriptor> {
        self.report(vhost).servers
    }

    /// Describe every server together with the pool counters.
    ///
    /// All three are read under one lock, so the counters always agree with the
    /// server list even while selections run concurrently.
    pub fn report(&self, vhost: &str) -> PoolReport {
        let policy = self.config.ranking;
        let state = self.state.lock();

        let mut servers: Vec<_> = state.servers.values().collect();
        servers.sort_by_cached_key(|server| policy.key(server));
        PoolReport {
            servers: servers
                .into_iter()
                .map(|server| server.descriptor(vhost, policy))
                .collect(),
            redirect_total: state.redirect_total,
            total_connections: state.total_connections(),
        }
    }
}

/// A consistent view of the whole pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    /// Every known server, ordered by load then id
    pub servers: Vec<ServerDescriptor>,
    /// Redirects handed out since the pool was created
    pub redirect_total: u64,
    /// Reported connections plus pending redirects over every server
    pub total_connections: i64,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::domain::heartbeat::{CustomProperties, Heartbeat};
    use crate::domain::server::{ServerStatus, VHostAddress};
    use crate::load_balancer::pool::{PoolConfig, ServerPool};
    use crate::load_balancer::ranking::RankingPolicy;

    use super::*;

    fn pool() -> ServerPool {
        ServerPool::new(PoolConfig::default())
    }

    fn running(id: &str, out_rate: i64) -> Heartbeat {
        Heartbeat::running(id, out_rate).with_redirect(format!("{id}.example"))
    }

    fn pick(pool: &ServerPool) -> String {
        pool.select_server("")
            .into_address()
            .expect("a running server")
    }

    #[test]
    fn test_empty_pool_returns_no_server() {
        let pool = pool();
        assert_eq!(pool.select_server("live"), RedirectDecision::NoEligibleServer);
        assert_eq!(pool.redirect_total(), 0);
        assert_eq!(pool.known_count(), 0);
    }

    #[test]
    fn test_equal_servers_cycle_in_id_order() {
        let pool = pool();
        for id in ["c", "a", "b"] {
            pool.on_heartbeat(running(id, 0));
        }

        let picks: Vec<String> = (0..6).map(|_| pick(&pool)).collect();
        assert_eq!(
            picks,
            vec![
                "a.example", "b.example", "c.example", "a.example", "b.example", "c.example"
            ]
        );
        assert_eq!(pool.redirect_total(), 6);
    }

    #[test]
    fn test_exact_tie_resolves_by_id() {
        let pool = pool();
        // 200 / 2 == 100 / 1
        let heavy = running("edge-b", 200).with_custom(CustomProperties {
            weight: Some(2),
            vhosts: HashMap::new(),
        });
        pool.on_heartbeat(heavy);
        pool.on_heartbeat(running("edge-a", 100));

        assert_eq!(pick(&pool), "edge-a.example");
        assert_eq!(pick(&pool), "edge-b.example");
        assert_eq!(pick(&pool), "edge-a.example");
    }

    #[test]
    fn test_least_bandwidth_wins_until_redirects_catch_up() {
        let pool = pool();
        pool.on_heartbeat(running("busy", 5));
        pool.on_heartbeat(running("idle", 2));

        // idle: 2, 3, 4 then ties busy at 5 and loses on id ordering ("busy" < "idle")
        let picks: Vec<String> = (0..4).map(|_| pick(&pool)).collect();
        assert_eq!(
            picks,
            vec!["idle.example", "idle.example", "idle.example", "busy.example"]
        );
    }

    #[test]
    fn test_heartbeat_resets_redirect_count() {
        let pool = pool();
        pool.on_heartbeat(running("a", 0));
        pool.on_heartbeat(running("b", 0));
        pick(&pool);
        pick(&pool);
        pick(&pool);
        assert_eq!(pool.candidate("a").unwrap().redirect_count, 2);

        pool.on_heartbeat(running("a", 0));
        assert_eq!(pool.candidate("a").unwrap().redirect_count, 0);
        assert_eq!(pick(&pool), "a.example");
    }

    #[test]
    fn test_vhost_address_resolution() {
        let pool = pool();
        let mut vhosts = HashMap::new();
        vhosts.insert("live".to_string(), VHostAddress::new("live.edge-a"));
        pool.on_heartbeat(running("edge-a", 0).with_custom(CustomProperties {
            weight: None,
            vhosts,
        }));

        assert_eq!(
            pool.select_server("live"),
            RedirectDecision::Redirect("live.edge-a".to_string())
        );
        assert_eq!(
            pool.select_server("other"),
            RedirectDecision::Redirect("edge-a.example".to_string())
        );
    }

    #[test]
    fn test_server_without_any_address_yields_no_server() {
        let pool = pool();
        pool.on_heartbeat(Heartbeat::running("naked", 0));
        assert_eq!(pool.select_server("live"), RedirectDecision::NoEligibleServer);
        assert_eq!(pool.candidate("naked").unwrap().redirect_count, 1);
    }

    #[test]
    fn test_stopped_servers_are_not_selected() {
        let pool = pool();
        pool.on_heartbeat(running("a", 0));
        pool.on_heartbeat(running("b", 0).with_status(ServerStatus::Stopped));

        for _ in 0..3 {
            assert_eq!(pick(&pool), "a.example");
        }
    }

    #[test]
    fn test_heavier_server_is_selected_at_least_as_often() {
        let pool = pool();
        let custom = |weight| CustomProperties {
            weight: Some(weight),
            vhosts: HashMap::new(),
        };
        let mut picks: HashMap<String, u32> = HashMap::new();
        let (mut rate_a, mut rate_b) = (0_i64, 0_i64);

        for _round in 0..50 {
            pool.on_heartbeat(running("a", rate_a).with_custom(custom(2)));
            pool.on_heartbeat(running("b", rate_b).with_custom(custom(1)));
            for _ in 0..6 {
                let chosen = pick(&pool);
                *picks.entry(chosen.clone()).or_default() += 1;
                // each redirected client adds 10 units of outbound traffic
                if chosen == "a.example" {
                    rate_a += 10;
                } else {
                    rate_b += 10;
                }
            }
        }

        let a = picks.get("a.example").copied().unwrap_or(0);
        let b = picks.get("b.example").copied().unwrap_or(0);
        assert!(a >= b, "weight 2 server got {a} picks, weight 1 server got {b}");
    }

    #[test]
    fn test_connections_policy() {
        let pool = ServerPool::new(PoolConfig {
            ranking: RankingPolicy::Connections,
            ..PoolConfig::default()
        });
        let mut busy = running("a", 0);
        busy.connect_count = Some(10);
        let mut quiet = running("b", 1_000_000);
        quiet.connect_count = Some(1);
        pool.on_heartbeat(busy);
        pool.on_heartbeat(quiet);

        assert_eq!(pick(&pool), "b.example");
    }

    #[test]
    fn test_describe_all_includes_every_server_without_mutation() {
        let pool = pool();
        pool.on_heartbeat(running("a", 300));
        pool.on_heartbeat(running("b", 100));
        pool.on_heartbeat(running("c", 0).with_status(ServerStatus::Stopped));
        pick(&pool);

        let before_total = pool.redirect_total();
        let described = pool.describe_all("");
        let ids: Vec<&str> = described.iter().map(|d| d.server_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(described[0].status, "stopped");
        assert_eq!(described[1].redirect_count, 1);
        assert!(described.iter().all(|d| d.last_message.is_some()));
        assert_eq!(pool.redirect_total(), before_total);
        assert_eq!(pool.candidate("b").unwrap().redirect_count, 1);
    }

    #[test]
    fn test_report_counters_match_server_list() {
        let pool = Arc::new(pool());
        for id in ["a", "b", "c"] {
            pool.on_heartbeat(running(id, 0));
        }

        let selector = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let _ = pool.select_server("");
                }
            })
        };
        for _ in 0..200 {
            let report = pool.report("");
            let pending: i64 = report.servers.iter().map(|d| d.redirect_count).sum();
            assert_eq!(report.redirect_total, pending as u64);
            assert_eq!(report.total_connections, pending);
        }
        selector.join().unwrap();

        let report = pool.report("");
        assert_eq!(report.redirect_total, 500);
        assert_eq!(report.total_connections, 500);
    }

    #[test]
    fn test_report_scores_with_active_policy() {
        let pool = ServerPool::new(PoolConfig {
            ranking: RankingPolicy::Connections,
            ..PoolConfig::default()
        });
        let mut hb = running("a", 9000);
        hb.connect_count = Some(7);
        pool.on_heartbeat(hb);

        assert_eq!(pool.report("").servers[0].load_score, 7);
    }

    #[test]
    fn test_concurrent_selection_loses_no_redirects() {
        use std::thread;

        let pool = Arc::new(pool());
        for id in ["a", "b", "c", "d"] {
            pool.on_heartbeat(running(id, 0));
        }

        let mut handles = vec![];
        for i in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for n in 0..250 {
                    if i == 0 && n % 50 == 0 {
                        pool.sweep();
                    }
                    let _ = pool.select_server("");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.redirect_total(), 2000);
        let per_server: i64 = ["a", "b", "c", "d"]
            .iter()
            .map(|id| pool.candidate(id).unwrap().redirect_count)
            .sum();
        assert_eq!(per_server, 2000);
        // equal servers stay within one redirect of each other
        for id in ["a", "b", "c", "d"] {
            assert_eq!(pool.candidate(id).unwrap().redirect_count, 500);
        }
    }

    #[test]
    fn test_pool_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ServerPool>();
    }
}
