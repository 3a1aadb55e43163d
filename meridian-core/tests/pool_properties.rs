//! Property tests for the connection pool.

use std::time::{Duration, Instant};

use meridian_core::{Heartbeat, PoolConfig, RankingPolicy, ServerPool, ServerStatus};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Heartbeat {
        server: usize,
        status: i64,
        out_rate: i64,
        at_ms: u64,
    },
    Sweep {
        at_ms: u64,
    },
    Select,
}

const SERVERS: [&str; 5] = ["edge-a", "edge-b", "edge-c", "edge-d", "edge-e"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..SERVERS.len(), 0i64..5, -1i64..10_000, 0u64..20_000).prop_map(
            |(server, status, out_rate, at_ms)| Op::Heartbeat {
                server,
                status,
                out_rate,
                at_ms,
            }
        ),
        2 => (0u64..30_000).prop_map(|at_ms| Op::Sweep { at_ms }),
        3 => Just(Op::Select),
    ]
}

fn heartbeat(id: &str, status: i64, out_rate: i64) -> Heartbeat {
    Heartbeat::running(id, out_rate)
        .with_redirect(format!("{id}.example"))
        .with_status(ServerStatus::from_code(status))
}

fn assert_exclusion(pool: &ServerPool) -> Result<(), TestCaseError> {
    for id in pool.known_ids() {
        let server = pool.candidate(&id).expect("known id has a row");
        prop_assert_eq!(
            pool.is_eligible(&id),
            server.status == ServerStatus::Running,
            "server {} with status {} has wrong ranked membership",
            id,
            server.status
        );
    }
    prop_assert!(pool.eligible_count() <= pool.known_count());
    Ok(())
}

proptest! {
    /// Property: ranked membership tracks Running status after every operation
    #[test]
    fn ranked_set_holds_exactly_the_running_servers(
        ops in prop::collection::vec(op_strategy(), 1..60),
        connections in any::<bool>(),
    ) {
        let ranking = if connections { RankingPolicy::Connections } else { RankingPolicy::Bandwidth };
        let pool = ServerPool::new(PoolConfig {
            message_timeout: Duration::from_millis(5_000),
            ranking,
        });
        let start = Instant::now();

        for op in ops {
            match op {
                Op::Heartbeat { server, status, out_rate, at_ms } => {
                    let hb = heartbeat(SERVERS[server], status, out_rate);
                    pool.on_heartbeat_at(hb, start + Duration::from_millis(at_ms));
                }
                Op::Sweep { at_ms } => {
                    pool.sweep_at(start + Duration::from_millis(at_ms));
                }
                Op::Select => {
                    let eligible = pool.eligible_count();
                    let decision = pool.select_server("");
                    prop_assert_eq!(decision.address().is_some(), eligible > 0);
                }
            }
            assert_exclusion(&pool)?;
        }
    }

    /// Property: the selection sequence does not depend on heartbeat arrival order
    #[test]
    fn selection_order_is_deterministic(
        rates in prop::collection::vec(0i64..50, SERVERS.len()),
        picks in 1usize..40,
    ) {
        let forward = ServerPool::default();
        let backward = ServerPool::default();
        for (id, rate) in SERVERS.iter().zip(&rates) {
            forward.on_heartbeat(heartbeat(id, 1, *rate));
        }
        for (id, rate) in SERVERS.iter().zip(&rates).rev() {
            backward.on_heartbeat(heartbeat(id, 1, *rate));
        }

        for _ in 0..picks {
            prop_assert_eq!(forward.select_server(""), backward.select_server(""));
        }
    }

    /// Property: every selection goes to a server with the minimum (load, id) key
    #[test]
    fn selection_takes_the_least_loaded_server(
        rates in prop::collection::vec(0i64..1_000, SERVERS.len()),
        weights in prop::collection::vec(1i64..8, SERVERS.len()),
    ) {
        let pool = ServerPool::default();
        for ((id, rate), weight) in SERVERS.iter().zip(&rates).zip(&weights) {
            let mut hb = heartbeat(id, 1, *rate);
            hb.custom = Some(meridian_core::CustomProperties {
                weight: Some(*weight),
                vhosts: Default::default(),
            });
            pool.on_heartbeat(hb);
        }

        let expected = SERVERS
            .iter()
            .map(|id| {
                let server = pool.candidate(id).expect("registered");
                (RankingPolicy::Bandwidth.load(&server), id.to_string())
            })
            .min()
            .map(|(_, id)| format!("{id}.example"));

        prop_assert_eq!(pool.select_server("").into_address(), expected);
    }
}
