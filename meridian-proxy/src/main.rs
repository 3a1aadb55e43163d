//! Meridian Proxy Engine
//!
//! Front end of the edge load balancer: it binds the client listener, the heartbeat
//! listener and the admin socket, and runs the staleness sweep.

#![deny(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use meridian_admin::AdminServer;
use meridian_core::{ConfigCache, ServerPool};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod adapter;
mod config;
mod connection_pool;
mod error;
mod health_check;
mod heartbeat;
mod server;
mod session_probe;
mod tls;

use crate::adapter::HttpStreamingAdapter;
use crate::config::ProxyConfig;
use crate::connection_pool::UpstreamClient;
use crate::heartbeat::HeartbeatListener;
use crate::server::FrontState;

/// Entrypoint for the Meridian load balancer.
///
/// Takes an optional configuration file path as its only argument; every
/// setting can also come from `MERIDIAN_*` environment variables.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Arc::new(
        ProxyConfig::load(config_path.as_deref()).context("failed to load configuration")?,
    );
    info!(
        listen = %config.listen,
        origin = %config.origin,
        ranking = ?config.ranking,
        "starting Meridian"
    );

    let pool = Arc::new(ServerPool::new(config.pool_config()));
    let cache = Arc::new(ConfigCache::new());
    config.populate(&cache);

    let tls_acceptor = tls::acceptor(config.tls.as_ref()).context("failed to set up TLS")?;
    let upstream = UpstreamClient::new(config.upstream_timeout());
    let admin = AdminServer::new(pool.clone(), config.admin_settings());

    let state = Arc::new(FrontState {
        adapter: HttpStreamingAdapter::new(pool.clone(), cache, upstream.clone()),
        admin: admin.clone(),
        upstream,
        origin: config.origin_uri()?,
        config: config.clone(),
    });

    let front = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    let heartbeats = TcpListener::bind(config.heartbeat_listen)
        .await
        .with_context(|| format!("failed to bind {}", config.heartbeat_listen))?;

    let sweeper = health_check::sweeper::spawn_sweeper(pool.clone(), config.sweep_interval());
    let intake = HeartbeatListener::new(pool, config.listener_key.clone());

    let admin_task = config.admin_socket.clone().map(|path| {
        tokio::spawn(async move {
            if let Err(err) = admin.serve_unix(&path).await {
                error!(path = %path.display(), error = %err, "admin socket stopped");
            }
        })
    });

    let outcome = tokio::select! {
        result = server::serve(front, tls_acceptor, state) => result.context("front server stopped"),
        result = intake.serve(heartbeats) => result.context("heartbeat listener stopped"),
        signal = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            signal.context("failed to listen for ctrl-c")
        }
    };

    sweeper.abort();
    if let Some(task) = admin_task {
        task.abort();
    }
    if let Some(path) = &config.admin_socket {
        let _ = std::fs::remove_file(path);
    }

    info!("Meridian stopped");
    outcome
}
