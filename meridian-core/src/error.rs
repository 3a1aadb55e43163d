//! Error types for the core crate.
//!
//! Redirect queries and rewrites report their expected outcomes as values;
//! these errors cover lookups and inputs that callers may want to surface.

use thiserror::Error;

/// A per-application setting could not be found in the config cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MissingProperty {
    /// Nothing is cached for the virtual host
    #[error("vhost '{vhost}' is not cached")]
    VHostNotCached {
        /// Requested virtual host
        vhost: String,
    },

    /// The virtual host is known but the application is not
    #[error("application config for '{application}' in vhost '{vhost}' is not cached")]
    ApplicationNotCached {
        /// Requested virtual host
        vhost: String,
        /// Requested application
        application: String,
    },
}

/// A heartbeat could not be attributed to a server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatError {
    /// The record carried no server id
    #[error("heartbeat has no server id")]
    MissingServerId,
}
