//! Absolute base URLs pointing at a chosen edge server.

use std::fmt;

use tracing::{debug, warn};

use crate::patterns::patterns;
use crate::ManifestFormat;

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// Scheme, authority and path prefix of an edge URL.
///
/// Displays as `scheme://authority/path`. The path either is empty or starts with
/// exactly one `/`, and never ends with one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrl {
    secure: bool,
    authority: String,
    path: String,
}

impl BaseUrl {
    /// Start building a base URL for `host`, the address picked by the selector.
    pub fn builder(host: impl Into<String>) -> BaseUrlBuilder {
        BaseUrlBuilder {
            host: host.into(),
            port: None,
            path: String::new(),
            app: None,
        }
    }

    /// Whether the URL uses `https`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// `http` or `https`.
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Host, plus the port when a non-default one was configured.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The normalised path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The same URL with the trailing manifest filename (and any query) removed.
    ///
    /// This is the prefix relative references inside the manifest resolve against.
    /// A path that does not end in a manifest filename is returned unchanged.
    pub fn manifest_directory(&self, format: ManifestFormat) -> BaseUrl {
        let stripped = match patterns() {
            Ok(p) => {
                let file = match format {
                    ManifestFormat::Playlist => &p.playlist_file,
                    ManifestFormat::Manifest => &p.manifest_file,
                };
                file.replace(&self.path, "").into_owned()
            }
            Err(err) => {
                warn!(error = %err, path = %self.path, "cannot strip manifest filename");
                self.path.clone()
            }
        };
        BaseUrl {
            secure: self.secure,
            authority: self.authority.clone(),
            path: normalize_path(&stripped),
        }
    }

    /// The URL followed by `?query`, or the bare URL when the query is empty.
    pub fn with_query(&self, query: &str) -> String {
        let query = query.trim_start_matches('?');
        if query.is_empty() {
            self.to_string()
        } else {
            format!("{self}?{query}")
        }
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme(), self.authority, self.path)
    }
}

/// Builder for [`BaseUrl`].
#[derive(Debug, Clone)]
pub struct BaseUrlBuilder {
    host: String,
    port: Option<u16>,
    path: String,
    app: Option<(String, String)>,
}

impl BaseUrlBuilder {
    /// Fixed redirect port. `443` switches the scheme to `https`; `80` and `443`
    /// are never written out.
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Request path on the balancer, e.g. `/live/stream/playlist.m3u8`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Replace the leading `application` path segment with `target` when a
    /// different target is configured.
    pub fn rename_app(mut self, application: &str, target: Option<&str>) -> Self {
        self.app = target
            .filter(|target| !target.is_empty() && *target != application)
            .map(|target| (application.to_string(), target.to_string()));
        self
    }

    /// Assemble the URL.
    pub fn build(self) -> BaseUrl {
        let secure = self.port == Some(HTTPS_PORT);
        let authority = match self.port {
            Some(port) if port != HTTP_PORT && port != HTTPS_PORT => {
                format!("{}:{port}", strip_port(&self.host))
            }
            Some(_) => strip_port(&self.host).to_string(),
            None => self.host.clone(),
        };

        let mut path = normalize_path(&self.path);
        if let Some((application, target)) = &self.app {
            path = rename_first_segment(&path, application, target);
        }

        BaseUrl {
            secure,
            authority,
            path,
        }
    }
}

/// Drop a `:port` suffix from a host name; bracketed IPv6 literals keep their brackets.
pub fn strip_port(host: &str) -> &str {
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn rename_first_segment(path: &str, application: &str, target: &str) -> String {
    let rest = path.strip_prefix('/').unwrap_or(path);
    let (first, tail) = match rest.split_once('/') {
        Some((first, tail)) => (first, Some(tail)),
        None => (rest, None),
    };
    if first != application {
        debug!(path, application, "path does not start with the application, not renaming");
        return path.to_string();
    }
    let target = target.trim_matches('/');
    match tail {
        Some(tail) => format!("/{target}/{tail}"),
        None => format!("/{target}"),
    }
}
