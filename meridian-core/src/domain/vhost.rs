//! Per-application redirect settings, keyed by virtual host and application name.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::MissingProperty;

/// Redirect settings for one application inside one virtual host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VHostProperties {
    /// Application name to use on the edge instead of the balancer's name
    pub redirect_app_name: Option<String>,
    /// Fixed port for redirects; `None` keeps the original port
    pub redirect_port: Option<u16>,
    /// Redirect every session, rather than only those asking with `redirect=true`
    pub redirect_on_connect: bool,
    /// Fetch a session id from the chosen edge before answering
    pub rewrite_session_id: bool,
}

impl Default for VHostProperties {
    fn default() -> Self {
        Self {
            redirect_app_name: None,
            redirect_port: None,
            redirect_on_connect: true,
            rewrite_session_id: false,
        }
    }
}

impl VHostProperties {
    /// Normalise a configured port: absent, non-positive and out-of-range values mean "unset".
    pub fn normalize_port(raw: Option<i64>) -> Option<u16> {
        raw.filter(|port| *port > 0)
            .and_then(|port| u16::try_from(port).ok())
    }
}

type AppTable = HashMap<String, HashMap<String, VHostProperties>>;

/// Cache of application settings.
///
/// Reads are lock-free; `load` and `expire` swap in a new table, so lookups on the
/// request path never wait on an application starting or stopping.
#[derive(Debug)]
pub struct ConfigCache {
    applications: ArcSwap<AppTable>,
    defaults: VHostProperties,
}

impl ConfigCache {
    /// Create an empty cache using the built-in defaults.
    pub fn new() -> Self {
        Self::with_defaults(VHostProperties::default())
    }

    /// Create an empty cache returning `defaults` on a miss.
    pub fn with_defaults(defaults: VHostProperties) -> Self {
        Self {
            applications: ArcSwap::from_pointee(HashMap::new()),
            defaults,
        }
    }

    /// Cache the settings for an application, replacing any previous entry.
    pub fn load(&self, vhost: &str, application: &str, props: VHostProperties) {
        debug!(vhost, application, ?props, "caching application properties");
        self.applications.rcu(|current| {
            let mut next = (**current).clone();
            next.entry(vhost.to_string())
                .or_default()
                .insert(application.to_string(), props.clone());
            next
        });
    }

    /// Drop the settings for an application that stopped.
    pub fn expire(&self, vhost: &str, application: &str) {
        debug!(vhost, application, "expiring application properties");
        self.applications.rcu(|current| {
            let mut next = (**current).clone();
            if let Some(apps) = next.get_mut(vhost) {
                apps.remove(application);
                if apps.is_empty() {
                    next.remove(vhost);
                }
            }
            next
        });
    }

    /// Look up the settings for an application.
    pub fn properties(
        &self,
        vhost: &str,
        application: &str,
    ) -> Result<VHostProperties, MissingProperty> {
        let table = self.applications.load();
        let apps = table.get(vhost).ok_or_else(|| MissingProperty::VHostNotCached {
            vhost: vhost.to_string(),
        })?;
        apps.get(application)
            .cloned()
            .ok_or_else(|| MissingProperty::ApplicationNotCached {
                vhost: vhost.to_string(),
                application: application.to_string(),
            })
    }

    /// Look up the settings for an application, falling back to the defaults on a miss.
    pub fn properties_or_default(&self, vhost: &str, application: &str) -> VHostProperties {
        self.properties(vhost, application).unwrap_or_else(|miss| {
            debug!(vhost, application, reason = %miss, "using default application properties");
            self.defaults.clone()
        })
    }

    /// Number of cached applications across all vhosts.
    pub fn len(&self) -> usize {
        self.applications.load().values().map(HashMap::len).sum()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared reference to the config cache.
pub type SharedConfigCache = Arc<ConfigCache>;
