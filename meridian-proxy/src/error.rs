//! Error types for the proxy binary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Startup and listener failures.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The configuration could not be read or deserialised
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The origin setting is not a usable `http://` URI
    #[error("invalid origin '{origin}': {reason}")]
    InvalidOrigin {
        /// Configured value
        origin: String,
        /// What is wrong with it
        reason: String,
    },

    /// The certificate or key was rejected
    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    /// The key file held no PKCS#8 private key
    #[error("no PKCS#8 private key found in {0}")]
    MissingPrivateKey(PathBuf),

    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the origin or to an edge server.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Only plain `http://` upstreams are fetched
    #[error("unsupported upstream scheme in '{0}'")]
    UnsupportedScheme(String),

    /// The URI names no host
    #[error("upstream URI has no host: '{0}'")]
    MissingHost(String),

    /// TCP connect failed
    #[error("connect to {authority} failed: {source}")]
    Connect {
        /// `host:port` dialled
        authority: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// No response within the configured timeout
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP protocol failure
    #[error("upstream HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The request could not be built
    #[error("invalid upstream request: {0}")]
    Request(#[from] hyper::http::Error),
}
