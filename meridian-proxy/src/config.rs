//! Proxy configuration.
//!
//! Read from an optional file (any format the `config` crate understands) and
//! then from `MERIDIAN_*` environment variables, nested keys separated by `__`
//! (`MERIDIAN_TLS__CERT_PATH`). Every key has a default.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hyper::Uri;
use meridian_admin::AdminSettings;
use meridian_core::{ConfigCache, PoolConfig, RankingPolicy, VHostProperties};
use serde::Deserialize;
use tracing::info;

use crate::error::ProxyError;

/// Name of the vhost used when nothing more specific applies.
pub const DEFAULT_VHOST: &str = "_defaultVHost_";

/// Top-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Client-facing listen address
    pub listen: SocketAddr,
    /// Where streaming requests are fetched from, e.g. `http://127.0.0.1:1935`
    pub origin: String,
    /// Listen address for edge heartbeats
    pub heartbeat_listen: SocketAddr,
    /// Unix socket for the admin API; disabled when unset
    pub admin_socket: Option<PathBuf>,
    /// Shared key edges must send in `X-LoadBalancer-Key`
    pub listener_key: Option<String>,
    /// Heartbeat age after which a server is marked timed out
    pub message_timeout_ms: u64,
    /// How often the staleness sweep runs
    pub sweep_interval_ms: u64,
    /// Timeout for origin fetches and session probes
    pub upstream_timeout_ms: u64,
    /// Server scoring policy
    pub ranking: RankingPolicy,
    /// Serve `serverInfo` and `serverInfoJSON` views
    pub enable_server_info: bool,
    /// Vhost for requests whose `Host` has no alias
    pub default_vhost: String,
    /// `Host` header value to vhost name
    pub vhost_aliases: HashMap<String, String>,
    /// TLS for the client-facing listener
    pub tls: Option<TlsSettings>,
    /// Per-application redirect settings
    pub applications: Vec<ApplicationSettings>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            origin: "http://127.0.0.1:1935".to_string(),
            heartbeat_listen: SocketAddr::from(([0, 0, 0, 0], 1934)),
            admin_socket: None,
            listener_key: None,
            message_timeout_ms: 5000,
            sweep_interval_ms: 1000,
            upstream_timeout_ms: 5000,
            ranking: RankingPolicy::default(),
            enable_server_info: false,
            default_vhost: DEFAULT_VHOST.to_string(),
            vhost_aliases: HashMap::new(),
            tls: None,
            applications: Vec::new(),
        }
    }
}

/// Certificate and key in PEM form.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    /// Certificate chain
    pub cert_path: PathBuf,
    /// PKCS#8 private key
    pub key_path: PathBuf,
}

/// Redirect settings for one application.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    /// Owning vhost; the default vhost when omitted
    #[serde(default)]
    pub vhost: Option<String>,
    /// Application name, the first path segment of its requests
    pub name: String,
    /// Application name to use on the edge
    #[serde(default)]
    pub redirect_app_name: Option<String>,
    /// Fixed redirect port; absent or non-positive keeps the original
    #[serde(default)]
    pub redirect_port: Option<i64>,
    /// Redirect every session instead of only opted-in ones
    #[serde(default = "default_true")]
    pub redirect_on_connect: bool,
    /// Probe the edge for a session id before answering
    #[serde(default)]
    pub rewrite_session_id: bool,
}

fn default_true() -> bool {
    true
}

impl ApplicationSettings {
    fn properties(&self) -> VHostProperties {
        VHostProperties {
            redirect_app_name: self.redirect_app_name.clone().filter(|name| !name.is_empty()),
            redirect_port: VHostProperties::normalize_port(self.redirect_port),
            redirect_on_connect: self.redirect_on_connect,
            rewrite_session_id: self.rewrite_session_id,
        }
    }
}

impl ProxyConfig {
    /// Load from `path` (if given) layered under the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ProxyError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("MERIDIAN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<ProxyConfig>()?;
        config.origin_uri()?;
        Ok(config)
    }

    /// Settings for the server pool.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            message_timeout: Duration::from_millis(self.message_timeout_ms),
            ranking: self.ranking,
        }
    }

    /// Settings for the diagnostic views.
    pub fn admin_settings(&self) -> AdminSettings {
        AdminSettings {
            enable_server_info: self.enable_server_info,
            default_vhost: self.default_vhost.clone(),
        }
    }

    /// Interval between staleness sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Timeout for upstream fetches.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// The origin as a URI, checked to be absolute `http`.
    pub fn origin_uri(&self) -> Result<Uri, ProxyError> {
        let invalid = |reason: &str| ProxyError::InvalidOrigin {
            origin: self.origin.clone(),
            reason: reason.to_string(),
        };
        let uri: Uri = self
            .origin
            .trim_end_matches('/')
            .parse()
            .map_err(|err: hyper::http::uri::InvalidUri| invalid(&err.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid("only http origins are supported"));
        }
        if uri.host().is_none() {
            return Err(invalid("missing host"));
        }
        Ok(uri)
    }

    /// Vhost serving requests for `host` (a `Host` header value, port allowed).
    pub fn vhost_for_host<'a>(&'a self, host: Option<&str>) -> &'a str {
        host.and_then(|host| {
            self.vhost_aliases
                .get(host)
                .or_else(|| self.vhost_aliases.get(host.split(':').next().unwrap_or(host)))
        })
        .map(String::as_str)
        .unwrap_or(&self.default_vhost)
    }

    /// Fill `cache` with the configured applications.
    pub fn populate(&self, cache: &ConfigCache) {
        for app in &self.applications {
            let vhost = app.vhost.as_deref().unwrap_or(&self.default_vhost);
            cache.load(vhost, &app.name, app.properties());
        }
        info!(applications = cache.len(), "application settings loaded");
    }
}
